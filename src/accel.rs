// SYNOID SR Acceleration Layer
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Picks the candle device an inference session runs on.
// CUDA and Metal are only reachable when the crate is built with the
// matching feature; otherwise the portable CPU path is the only option.

use crate::error::{Result, SrError};
use candle_core::Device;
use tracing::{info, warn};

/// Execution path an inference session runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acceleration {
    /// NVIDIA GPU via CUDA
    Cuda { ordinal: usize },
    /// Apple GPU via Metal
    Metal { ordinal: usize },
    /// Portable reference path
    Cpu { threads: usize },
}

impl Acceleration {
    pub fn cpu() -> Self {
        Acceleration::Cpu {
            threads: num_cpus::get(),
        }
    }

    pub fn is_accelerated(&self) -> bool {
        !matches!(self, Acceleration::Cpu { .. })
    }
}

impl std::fmt::Display for Acceleration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Acceleration::Cuda { ordinal } => write!(f, "CUDA device {}", ordinal),
            Acceleration::Metal { ordinal } => write!(f, "Metal device {}", ordinal),
            Acceleration::Cpu { threads } => write!(f, "CPU ({} threads)", threads),
        }
    }
}

/// A device plus how it was chosen.
pub struct DeviceSelection {
    pub device: Device,
    pub acceleration: Acceleration,
    /// Acceleration was requested but the CPU path was used instead.
    pub fell_back: bool,
}

/// Choose the device for a session.
///
/// With `prefer_acceleration`, CUDA is tried first, then Metal. If neither
/// comes up the session falls back to the CPU with a warning, unless
/// `strict` is set, in which case the open fails.
pub fn select_device(prefer_acceleration: bool, strict: bool) -> Result<DeviceSelection> {
    if !prefer_acceleration {
        return Ok(DeviceSelection {
            device: Device::Cpu,
            acceleration: Acceleration::cpu(),
            fell_back: false,
        });
    }

    let mut reasons = Vec::new();

    match Device::new_cuda(0) {
        Ok(device) => {
            info!("[ACCEL] ✓ CUDA device 0 initialized");
            return Ok(DeviceSelection {
                device,
                acceleration: Acceleration::Cuda { ordinal: 0 },
                fell_back: false,
            });
        }
        Err(e) => reasons.push(format!("cuda: {}", e)),
    }

    match Device::new_metal(0) {
        Ok(device) => {
            info!("[ACCEL] ✓ Metal device 0 initialized");
            return Ok(DeviceSelection {
                device,
                acceleration: Acceleration::Metal { ordinal: 0 },
                fell_back: false,
            });
        }
        Err(e) => reasons.push(format!("metal: {}", e)),
    }

    let reason = reasons.join("; ");
    if strict {
        return Err(SrError::AccelerationUnavailable(reason));
    }

    let acceleration = Acceleration::cpu();
    warn!(
        "[ACCEL] ⚠️ Hardware acceleration unavailable ({}). Falling back to {}",
        reason, acceleration
    );
    Ok(DeviceSelection {
        device: Device::Cpu,
        acceleration,
        fell_back: true,
    })
}

/// Print acceleration status (for CLI `devices` command)
pub fn print_device_status() {
    println!("=== SYNOID SR Device Status ===");
    println!(
        "CUDA: {}",
        if candle_core::utils::cuda_is_available() { "✓ compiled in" } else { "✗ not compiled in" }
    );
    println!(
        "Metal: {}",
        if candle_core::utils::metal_is_available() { "✓ compiled in" } else { "✗ not compiled in" }
    );

    match select_device(true, false) {
        Ok(sel) => {
            println!("Selected: {}", sel.acceleration);
            if sel.fell_back {
                println!("\n[Note] Acceleration was requested but no device came up;");
                println!("       sessions will run on the portable CPU path.");
            }
        }
        Err(e) => println!("Selected: none ({})", e),
    }
}
