//! Compute device and numeric precision selection

use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Requested compute device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSelector {
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl FromStr for DeviceSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "cpu" => return Ok(Self::Cpu),
            "cuda" | "gpu" => return Ok(Self::Cuda(0)),
            "metal" | "mps" => return Ok(Self::Metal(0)),
            _ => {}
        }

        let (kind, ordinal) = s
            .split_once(':')
            .ok_or_else(|| format!("Unknown compute device '{}'", s))?;
        let ordinal: usize = ordinal
            .parse()
            .map_err(|_| format!("Invalid device ordinal in '{}'", s))?;
        match kind {
            "cuda" | "gpu" => Ok(Self::Cuda(ordinal)),
            "metal" | "mps" => Ok(Self::Metal(ordinal)),
            _ => Err(format!("Unknown compute device '{}'", s)),
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(ordinal) => write!(f, "cuda:{}", ordinal),
            Self::Metal(ordinal) => write!(f, "metal:{}", ordinal),
        }
    }
}

/// Numeric precision for model weights and activations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    F16,
    BF16,
    F32,
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "float16" | "fp16" | "f16" | "half" => Ok(Self::F16),
            "bfloat16" | "bf16" => Ok(Self::BF16),
            "float32" | "fp32" | "f32" | "float" => Ok(Self::F32),
            other => Err(format!("Unknown precision '{}'", other)),
        }
    }
}

impl Precision {
    pub fn dtype(self) -> DType {
        match self {
            Self::F16 => DType::F16,
            Self::BF16 => DType::BF16,
            Self::F32 => DType::F32,
        }
    }

    pub fn is_half(self) -> bool {
        !matches!(self, Self::F32)
    }

    /// Precision actually used on `device`; half precision runs as f32 on CPU
    pub fn effective_for(self, device: &Device) -> Precision {
        if device.is_cpu() && self.is_half() {
            warn!(requested = ?self, "Half precision is not supported on CPU, using float32");
            Precision::F32
        } else {
            self
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F16 => write!(f, "float16"),
            Self::BF16 => write!(f, "bfloat16"),
            Self::F32 => write!(f, "float32"),
        }
    }
}

/// Open the requested device, falling back to CPU when it is unavailable
pub fn select_device(selector: DeviceSelector) -> Device {
    match selector {
        DeviceSelector::Cpu => Device::Cpu,
        DeviceSelector::Cuda(ordinal) if cuda_is_available() => match Device::new_cuda(ordinal) {
            Ok(device) => device,
            Err(e) => {
                warn!(device = %selector, error = %e, "Failed to open CUDA device, using CPU");
                Device::Cpu
            }
        },
        DeviceSelector::Metal(ordinal) if metal_is_available() => {
            match Device::new_metal(ordinal) {
                Ok(device) => device,
                Err(e) => {
                    warn!(device = %selector, error = %e, "Failed to open Metal device, using CPU");
                    Device::Cpu
                }
            }
        }
        _ => {
            warn!(
                device = %selector,
                "Requested accelerator is not available in this build, using CPU"
            );
            Device::Cpu
        }
    }
}

/// Short human readable device name for logs and health output
pub fn describe_device(device: &Device) -> String {
    match device {
        Device::Cpu => "cpu".to_string(),
        Device::Cuda(_) => "cuda".to_string(),
        Device::Metal(_) => "metal".to_string(),
    }
}
