//! Driver results the layer refuses to recover from.
//!
//! Device loss, host/device memory exhaustion and surface loss leave the
//! Vulkan device in a state where further use is undefined. Every raw call
//! whose result the layer inspects goes through [`check`], which logs and
//! aborts the process for those results and hands everything else back to
//! the caller.

use ash::vk;

/// Returns `true` for results after which continuing is undefined.
pub fn is_fatal(result: vk::Result) -> bool {
    matches!(
        result,
        vk::Result::ERROR_DEVICE_LOST
            | vk::Result::ERROR_OUT_OF_HOST_MEMORY
            | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            | vk::Result::ERROR_SURFACE_LOST_KHR
    )
}

/// Returns `true` for results that mean the swapchain no longer matches
/// its surface and has to be rebuilt.
pub fn is_stale_swapchain(result: vk::Result) -> bool {
    matches!(
        result,
        vk::Result::ERROR_OUT_OF_DATE_KHR
            | vk::Result::SUBOPTIMAL_KHR
            | vk::Result::ERROR_FULL_SCREEN_EXCLUSIVE_MODE_LOST_EXT
    )
}

/// Log `result` and abort.
#[cold]
pub fn abort(operation: &str, result: vk::Result) -> ! {
    tracing::error!(
        "Fatal driver error during {operation}: {result}. \
         The device can no longer be used safely; aborting"
    );
    std::process::abort()
}

/// Abort on fatal results, pass everything else through unchanged.
pub fn check<T>(
    operation: &str,
    result: Result<T, vk::Result>,
) -> Result<T, vk::Result> {
    match result {
        Err(e) if is_fatal(e) => abort(operation, e),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_loss_and_oom_are_fatal() {
        assert!(is_fatal(vk::Result::ERROR_DEVICE_LOST));
        assert!(is_fatal(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        assert!(is_fatal(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        assert!(is_fatal(vk::Result::ERROR_SURFACE_LOST_KHR));
    }

    #[test]
    fn staleness_is_not_fatal() {
        for result in [
            vk::Result::ERROR_OUT_OF_DATE_KHR,
            vk::Result::SUBOPTIMAL_KHR,
            vk::Result::ERROR_FULL_SCREEN_EXCLUSIVE_MODE_LOST_EXT,
        ] {
            assert!(!is_fatal(result));
            assert!(is_stale_swapchain(result));
        }
    }

    #[test]
    fn check_passes_recoverable_errors_through() {
        let result: Result<(), vk::Result> =
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert_eq!(
            check("acquire", result),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR)
        );
        assert_eq!(check("noop", Ok(7)), Ok(7));
    }
}
