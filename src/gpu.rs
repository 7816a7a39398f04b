//! Accelerator detection
//!
//! Probes for CUDA devices via nvidia-smi once per process. The result decides
//! accelerator mode when the configuration leaves it unset, and lets device
//! placement warn about ranks that no visible GPU backs.

use std::process::Command;
use std::sync::OnceLock;

/// Cached GPU information detected on first use
static GPU_INFO: OnceLock<GpuInfo> = OnceLock::new();

/// GPUs visible to this process
#[derive(Debug, Clone, Default)]
pub struct GpuInfo {
    /// Indices reported by nvidia-smi, in CUDA ordinal order
    pub indices: Vec<u32>,
}

impl GpuInfo {
    /// Number of visible GPUs
    pub fn count(&self) -> usize {
        self.indices.len()
    }

    /// Whether `rank` addresses a visible device
    pub fn is_valid_rank(&self, rank: u32) -> bool {
        (rank as usize) < self.indices.len()
    }
}

/// Detect available GPUs using nvidia-smi
pub fn detect_gpus() -> GpuInfo {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=index", "--format=csv,noheader"])
        .output();

    match output {
        Ok(output) if output.status.success() => {
            let indices = parse_gpu_indices(&String::from_utf8_lossy(&output.stdout));
            tracing::info!(
                gpu_count = indices.len(),
                indices = ?indices,
                "Detected available GPUs"
            );
            GpuInfo { indices }
        }
        Ok(output) => {
            tracing::debug!(
                stderr = %String::from_utf8_lossy(&output.stderr),
                "nvidia-smi failed, accelerator mode unavailable"
            );
            GpuInfo::default()
        }
        Err(e) => {
            tracing::debug!(
                error = %e,
                "nvidia-smi not runnable, accelerator mode unavailable"
            );
            GpuInfo::default()
        }
    }
}

fn parse_gpu_indices(stdout: &str) -> Vec<u32> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect()
}

static NO_GPUS: GpuInfo = GpuInfo {
    indices: Vec::new(),
};

/// Get cached GPU info, detecting on first call (blocks on nvidia-smi)
pub fn get_or_init() -> &'static GpuInfo {
    GPU_INFO.get_or_init(detect_gpus)
}

/// Detect GPUs on the blocking pool so async callers never stall a worker
pub async fn init() -> &'static GpuInfo {
    if let Some(info) = GPU_INFO.get() {
        return info;
    }
    match tokio::task::spawn_blocking(get_or_init).await {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!(error = %e, "GPU detection task failed, assuming no GPUs");
            &NO_GPUS
        }
    }
}

/// GPU info if detection has already run
pub fn get() -> Option<&'static GpuInfo> {
    GPU_INFO.get()
}
