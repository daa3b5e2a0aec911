use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use ndarray::Array2;

/// Converts a device string to a Candle Device.
///
/// Accepts `"cpu"`, `"cuda"` (index 0) and `"cuda:N"`.
///
/// # Errors
///
/// Returns an error if the CUDA device is not available or the device
/// string is not recognised.
pub fn get_device(device_str: &str) -> Result<Device> {
    if device_str.starts_with("cuda") {
        let cuda_index = if device_str == "cuda" {
            0
        } else {
            device_str
                .split(':')
                .nth(1)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| anyhow!("Malformed CUDA device string: {}", device_str))?
        };

        let device = Device::cuda_if_available(cuda_index)?;
        if !device.is_cuda() {
            return Err(anyhow!("CUDA device {} is not available", cuda_index));
        }
        Ok(device)
    } else {
        match device_str {
            "cpu" => Ok(Device::Cpu),
            _ => Err(anyhow!("Unsupported device type: {}", device_str)),
        }
    }
}

/// Row-major copy of `x` as an f32 tensor.
pub fn array_to_tensor(x: &Array2<f64>, device: &Device) -> Result<Tensor> {
    let data: Vec<f32> = x.iter().map(|&v| v as f32).collect();
    Ok(Tensor::from_vec(data, x.dim(), device)?)
}

pub fn tensor_to_array(t: &Tensor) -> Result<Array2<f64>> {
    let (rows, cols) = t.dims2()?;
    let data: Vec<f64> = t
        .to_dtype(candle_core::DType::F32)?
        .flatten_all()?
        .to_vec1::<f32>()?
        .into_iter()
        .map(f64::from)
        .collect();
    Ok(Array2::from_shape_vec((rows, cols), data)?)
}
