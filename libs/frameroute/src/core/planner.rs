// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Transfer planning: pick the cheapest valid strategy for a domain pair.

use crate::core::device::AllocatorId;
use crate::core::domain::MemoryDomain;

/// How a frame gets from one memory domain to another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferStrategy {
    /// Source and destination already share the domain; nothing to move.
    Identity,
    /// Row-strided copy through addressable (mapped) memory.
    Staged,
    /// Device-to-device 2D copy on the engine stream.
    Direct,
    /// Copy through a graphics resource mapped on its owning worker thread.
    Interop,
}

/// Per-frame transfer decision. Transient; recomputed for every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferPlan {
    pub src: MemoryDomain,
    pub dst: MemoryDomain,
    pub strategy: TransferStrategy,
    /// At most one re-plan is allowed when the strategy fails at execution
    /// time. `None` means a failure is final for this frame.
    pub fallback: Option<TransferStrategy>,
}

fn involves_vendor(src: MemoryDomain, dst: MemoryDomain) -> bool {
    src == MemoryDomain::VendorSurface || dst == MemoryDomain::VendorSurface
}

/// Decide the strategy for a (source, destination) domain pair.
///
/// Direct device copies between a device allocation and a vendor surface
/// additionally require both sides to come from the same allocator context;
/// otherwise the pointers are not comparable and the copy stages through
/// host memory.
pub fn plan(
    src: MemoryDomain,
    dst: MemoryDomain,
    src_allocator: Option<AllocatorId>,
    dst_allocator: Option<AllocatorId>,
) -> TransferPlan {
    use MemoryDomain::*;
    use TransferStrategy::*;

    let same_allocator = match (src_allocator, dst_allocator) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    };

    let strategy = match (src, dst) {
        (System, _) => Staged,
        (Device, System) => Staged,
        (Device, Device) => Direct,
        (Device, VendorSurface) => {
            if same_allocator {
                Direct
            } else {
                Staged
            }
        }
        (Device, GraphicsInterop) => Interop,
        (VendorSurface, System) => Staged,
        (VendorSurface, Device | VendorSurface) => Direct,
        (VendorSurface, GraphicsInterop) => Interop,
        (GraphicsInterop, GraphicsInterop) => Identity,
        (GraphicsInterop, _) => Interop,
    };

    let fallback = match strategy {
        Identity | Staged => None,
        // A vendor surface has no addressable-memory rendition to stage
        // through, so those frames drop instead of degrading.
        Direct => (!involves_vendor(src, dst)).then_some(Staged),
        Interop => {
            if involves_vendor(src, dst) {
                Some(Direct)
            } else {
                Some(Staged)
            }
        }
    };

    TransferPlan {
        src,
        dst,
        strategy,
        fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MemoryDomain::*;
    use TransferStrategy::*;

    fn strat(src: MemoryDomain, dst: MemoryDomain) -> TransferStrategy {
        plan(src, dst, None, None).strategy
    }

    #[test]
    fn decision_table_is_exhaustive() {
        let expect = [
            ((System, System), Staged),
            ((System, Device), Staged),
            ((System, VendorSurface), Staged),
            ((System, GraphicsInterop), Staged),
            ((Device, System), Staged),
            ((Device, Device), Direct),
            ((Device, GraphicsInterop), Interop),
            ((VendorSurface, System), Staged),
            ((VendorSurface, Device), Direct),
            ((VendorSurface, VendorSurface), Direct),
            ((VendorSurface, GraphicsInterop), Interop),
            ((GraphicsInterop, System), Interop),
            ((GraphicsInterop, Device), Interop),
            ((GraphicsInterop, VendorSurface), Interop),
            ((GraphicsInterop, GraphicsInterop), Identity),
        ];
        for ((src, dst), want) in expect {
            assert_eq!(strat(src, dst), want, "{src:?} -> {dst:?}");
        }
    }

    #[test]
    fn device_to_vendor_needs_shared_allocator() {
        use crate::core::device::AllocatorId;
        let same = plan(
            Device,
            VendorSurface,
            Some(AllocatorId(3)),
            Some(AllocatorId(3)),
        );
        assert_eq!(same.strategy, Direct);
        let split = plan(
            Device,
            VendorSurface,
            Some(AllocatorId(3)),
            Some(AllocatorId(4)),
        );
        assert_eq!(split.strategy, Staged);
    }

    #[test]
    fn fallback_policy() {
        // Direct degrades to staged, except around vendor surfaces.
        assert_eq!(plan(Device, Device, None, None).fallback, Some(Staged));
        assert_eq!(plan(VendorSurface, Device, None, None).fallback, None);
        // Interop prefers a direct copy when a vendor surface is involved.
        assert_eq!(
            plan(VendorSurface, GraphicsInterop, None, None).fallback,
            Some(Direct)
        );
        assert_eq!(
            plan(GraphicsInterop, System, None, None).fallback,
            Some(Staged)
        );
        // Staged and identity never retry.
        assert_eq!(plan(System, Device, None, None).fallback, None);
        assert_eq!(
            plan(GraphicsInterop, GraphicsInterop, None, None).fallback,
            None
        );
    }
}
