// gpu/mod.rs — wgpu compute backend.
//
// `GpuBackend` runs the same closed set of kernels as `CpuBackend`, one
// WGSL compute shader per `Kernel` variant. The CPU kernels stay the
// authoritative reference; every shader is checked against them in the
// subprocess-isolated GPU tests.
//
//   ImageBuffer ──write (on host change)──▶ texture ──kernel──▶ texture ──▶ …
//                                                                  │
//   host consumer ◀──────── sync / read_back (batched) ────────────┘
//
// Textures live as long as their `ImageBuffer`; intermediate results
// never come back to the host unless a pass asks for them.

pub mod backend;
pub mod device;
pub mod image;

pub use backend::{GpuBackend, TransferStats};
pub use device::{DeviceProfile, GpuDevice, GpuError, WorkgroupSize};

/// Run one `#[ignore]`d inner GPU test in a child `cargo test` and require
/// it to print `GPU_TEST_OK`.
///
/// dzn on WSL2 can segfault at process exit once a Vulkan device has
/// existed, so the child's exit status is not trusted; the token is.
#[cfg(test)]
pub(crate) fn assert_gpu_subprocess_ok(test_name: &str) {
    let output = std::process::Command::new("cargo")
        .args(["test", "--lib", "--", test_name, "--exact", "--ignored", "--nocapture"])
        .output()
        .unwrap_or_else(|e| panic!("could not spawn cargo for {test_name}: {e}"));
    let log = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    print!("{log}");
    assert!(log.contains("GPU_TEST_OK"), "{test_name} did not report GPU_TEST_OK");
}
