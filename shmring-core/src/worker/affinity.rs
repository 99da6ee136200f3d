//! Pinning producer workers to CPU cores.

/// Result of attempting to pin the current thread to a specific core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinningResult {
    /// Successfully pinned to the requested core
    Success,
    /// Successfully pinned, but to a different core than requested
    SuccessDifferentCore(usize),
    /// Pinning is not supported on this platform
    Unsupported,
    /// Pinning failed for some other reason
    Failed,
}

/// Core assigned to the worker at `worker_idx`, round-robin over the logical cores.
pub fn core_for_worker(worker_idx: usize) -> usize {
    worker_idx % num_cpus::get().max(1)
}

/// Pins the calling thread to `core_id`.
///
/// Falls back to `core_id % available cores` when the requested core does not exist.
pub fn pin_current_to_core(core_id: usize) -> PinningResult {
    let Some(core_ids) = core_affinity::get_core_ids() else {
        return PinningResult::Unsupported;
    };

    if let Some(core) = core_ids.get(core_id) {
        return if core_affinity::set_for_current(*core) {
            PinningResult::Success
        } else {
            PinningResult::Failed
        };
    }

    if core_ids.is_empty() {
        return PinningResult::Failed;
    }

    let fallback = core_id % core_ids.len();
    if core_affinity::set_for_current(core_ids[fallback]) {
        PinningResult::SuccessDifferentCore(fallback)
    } else {
        PinningResult::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_core_for_worker_round_robin() {
        let cores = num_cpus::get();
        assert_eq!(core_for_worker(0), 0);
        assert_eq!(core_for_worker(cores), 0);
        for idx in 0..cores * 3 {
            assert!(core_for_worker(idx) < cores);
        }
    }

    #[test]
    fn test_pin_out_of_range_core_falls_back() {
        // Run on a throwaway thread so the test runner's threads keep their affinity.
        let result = thread::spawn(|| pin_current_to_core(usize::MAX))
            .join()
            .unwrap();
        assert_ne!(result, PinningResult::Success);
        if let PinningResult::SuccessDifferentCore(core) = result {
            let available = core_affinity::get_core_ids().map_or(0, |ids| ids.len());
            assert!(core < available);
        }
    }
}
