//! システムメトリクスのサンプラー

use crate::metrics::Labels;
use std::sync::Mutex;
use sysinfo::System;

/// サンプル1件
#[derive(Debug, Clone, PartialEq)]
pub struct SystemSample {
    pub name: String,
    pub value: f64,
    pub labels: Labels,
}

impl SystemSample {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            labels: Labels::new(),
        }
    }
}

/// プロセス・システム指標のサンプラー
///
/// ブロッキングしうるため、自動収集ループからは `spawn_blocking` 上で呼ばれる。
pub trait SystemSampler: Send + Sync {
    fn sample(&self) -> Vec<SystemSample>;
}

/// sysinfo によるサンプラー
pub struct ProcessSampler {
    system: Mutex<System>,
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler for ProcessSampler {
    fn sample(&self) -> Vec<SystemSample> {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        let mut samples = Vec::new();

        system.refresh_memory();
        let total = system.total_memory();
        let used = system.used_memory();
        samples.push(SystemSample::new("system.memory.total", total as f64));
        samples.push(SystemSample::new("system.memory.used", used as f64));
        if total > 0 {
            samples.push(SystemSample::new(
                "system.memory.used_percent",
                used as f64 / total as f64 * 100.0,
            ));
        }

        if let Ok(pid) = sysinfo::get_current_pid() {
            if system.refresh_process(pid) {
                if let Some(process) = system.process(pid) {
                    samples.push(SystemSample::new(
                        "system.process.resident_memory",
                        process.memory() as f64,
                    ));
                    samples.push(SystemSample::new(
                        "system.process.virtual_memory",
                        process.virtual_memory() as f64,
                    ));
                    samples.push(SystemSample::new(
                        "system.process.cpu_usage",
                        process.cpu_usage() as f64,
                    ));
                }
            }
        }

        samples
    }
}
