// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Capability negotiation: memory-domain/format offers and buffer pools.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::copier::CopyDirection;
use crate::core::device::AllocatorId;
use crate::core::domain::{MemoryDomain, PlatformCaps};
use crate::core::error::{Result, RouteError};
use crate::core::format::{PixelFormat, VideoFormatInfo};

/// One negotiable branch: a memory domain intersected with the pixel
/// formats it can carry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapsEntry {
    pub domain: MemoryDomain,
    pub formats: Vec<PixelFormat>,
}

/// Ordered set of domain/format offers, most preferred first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainCaps {
    pub entries: Vec<CapsEntry>,
}

/// Formats every domain supports; transfers never convert, so the set is
/// shared across the whole negotiation surface.
pub const SUPPORTED_FORMATS: [PixelFormat; 5] = [
    PixelFormat::Rgba8,
    PixelFormat::Bgra8,
    PixelFormat::Bgrx8,
    PixelFormat::Nv12,
    PixelFormat::I420,
];

impl DomainCaps {
    fn from_domains(domains: impl IntoIterator<Item = MemoryDomain>) -> Self {
        Self {
            entries: domains
                .into_iter()
                .map(|domain| CapsEntry {
                    domain,
                    formats: SUPPORTED_FORMATS.to_vec(),
                })
                .collect(),
        }
    }

    pub fn supports(&self, domain: MemoryDomain, format: PixelFormat) -> bool {
        self.entries
            .iter()
            .any(|e| e.domain == domain && e.formats.contains(&format))
    }

    /// Domains this copier produces, ordered by preference. Uploaders lead
    /// with device memory, downloaders with system memory; interop is offered
    /// only with a live token.
    pub fn offered(direction: CopyDirection, platform: &PlatformCaps) -> Self {
        let mut domains = match direction {
            CopyDirection::Upload => vec![MemoryDomain::Device],
            CopyDirection::Download => vec![MemoryDomain::System],
        };
        if platform.graphics_interop.is_some() {
            domains.push(MemoryDomain::GraphicsInterop);
        }
        match direction {
            CopyDirection::Upload => domains.push(MemoryDomain::System),
            CopyDirection::Download => domains.push(MemoryDomain::Device),
        }
        Self::from_domains(domains)
    }

    /// Domains this copier accepts on its input side.
    pub fn accepted(direction: CopyDirection, platform: &PlatformCaps) -> Self {
        let mut domains = match direction {
            CopyDirection::Upload => vec![MemoryDomain::System],
            CopyDirection::Download => vec![MemoryDomain::Device],
        };
        if platform.vendor_surface.is_some() {
            domains.push(MemoryDomain::VendorSurface);
        }
        if platform.graphics_interop.is_some() {
            domains.push(MemoryDomain::GraphicsInterop);
        }
        match direction {
            CopyDirection::Upload => domains.push(MemoryDomain::Device),
            CopyDirection::Download => domains.push(MemoryDomain::System),
        }
        Self::from_domains(domains)
    }
}

/// Buffer-pool parameters proposed to, or decided with, the peer stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferPoolConfig {
    /// Memory domain the pool allocates from.
    pub domain: MemoryDomain,
    /// Allocator context for device-backed domains; `None` for system pools.
    pub allocator: Option<AllocatorId>,
    /// Bytes per buffer.
    pub size: usize,
    pub min_buffers: u32,
    pub max_buffers: u32,
    /// Peer must attach per-plane stride/offset metadata.
    pub needs_video_meta: bool,
}

/// Build the pool configuration this core proposes for a negotiated format.
pub fn propose_pool(
    info: &VideoFormatInfo,
    domain: MemoryDomain,
    allocator: Option<AllocatorId>,
) -> BufferPoolConfig {
    BufferPoolConfig {
        domain,
        allocator,
        size: info.frame_size(),
        min_buffers: 2,
        max_buffers: 0,
        needs_video_meta: true,
    }
}

/// Accept or replace an externally supplied pool for `(domain, format)`.
///
/// An unsupported pair is refused rather than panicked. A supplied pool is
/// accepted only when its domain and allocator context match the negotiated
/// ones; a foreign pool is replaced with a fresh proposal. An accepted pool
/// is upgraded in place: the buffer size can only grow to fit the frame and
/// video metadata is always required. Without a supplied pool the proposal
/// stands.
pub fn decide_pool(
    offered: Option<BufferPoolConfig>,
    info: &VideoFormatInfo,
    domain: MemoryDomain,
    allocator: Option<AllocatorId>,
    supported: &DomainCaps,
) -> Result<BufferPoolConfig> {
    if !supported.supports(domain, info.format) {
        return Err(RouteError::Negotiation(format!(
            "no agreement on {domain:?} + {:?}",
            info.format
        )));
    }
    let proposal = propose_pool(info, domain, allocator);
    let config = match offered {
        Some(mut pool) if pool.domain == domain && pool.allocator == allocator => {
            pool.size = pool.size.max(proposal.size);
            pool.needs_video_meta = true;
            if pool.max_buffers != 0 {
                pool.max_buffers = pool.max_buffers.max(pool.min_buffers);
            }
            pool
        }
        Some(pool) => {
            debug!(
                offered_domain = ?pool.domain,
                offered_allocator = ?pool.allocator,
                ?domain,
                ?allocator,
                "offered pool does not match the negotiated memory, replacing"
            );
            proposal
        }
        None => proposal,
    };
    debug!(?domain, format = ?info.format, ?config, "pool decided");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::SubsystemToken;

    fn tokens() -> PlatformCaps {
        PlatformCaps {
            vendor_surface: Some(SubsystemToken::new()),
            graphics_interop: Some(SubsystemToken::new()),
            ..PlatformCaps::default()
        }
    }

    #[test]
    fn upload_prefers_device_output() {
        let caps = DomainCaps::offered(CopyDirection::Upload, &tokens());
        assert_eq!(caps.entries[0].domain, MemoryDomain::Device);
        assert!(caps.supports(MemoryDomain::GraphicsInterop, PixelFormat::Nv12));
    }

    #[test]
    fn tokens_gate_optional_domains() {
        let caps = DomainCaps::accepted(CopyDirection::Upload, &PlatformCaps::default());
        assert!(!caps.supports(MemoryDomain::VendorSurface, PixelFormat::Nv12));
        assert!(caps.supports(MemoryDomain::System, PixelFormat::Nv12));
    }

    #[test]
    fn unsupported_pair_is_refused() {
        let supported = DomainCaps::offered(CopyDirection::Download, &PlatformCaps::default());
        let info = VideoFormatInfo::new(PixelFormat::Nv12, 64, 64);
        let err = decide_pool(None, &info, MemoryDomain::VendorSurface, None, &supported);
        assert!(matches!(err, Err(RouteError::Negotiation(_))));
    }

    #[test]
    fn matching_pool_is_upgraded_not_replaced() {
        let supported = DomainCaps::offered(CopyDirection::Upload, &tokens());
        let info = VideoFormatInfo::new(PixelFormat::Rgba8, 64, 64);
        let allocator = Some(AllocatorId(3));
        let offered = BufferPoolConfig {
            domain: MemoryDomain::Device,
            allocator,
            size: 16,
            min_buffers: 4,
            max_buffers: 2,
            needs_video_meta: false,
        };
        let pool = decide_pool(
            Some(offered),
            &info,
            MemoryDomain::Device,
            allocator,
            &supported,
        )
        .unwrap();
        assert_eq!(pool.size, info.frame_size());
        assert_eq!(pool.min_buffers, 4);
        assert_eq!(pool.max_buffers, 4);
        assert!(pool.needs_video_meta);
    }

    #[test]
    fn foreign_pool_is_replaced_with_a_fresh_proposal() {
        let supported = DomainCaps::offered(CopyDirection::Upload, &tokens());
        let info = VideoFormatInfo::new(PixelFormat::Rgba8, 64, 64);
        // Same domain, different allocator context: cannot be shared.
        let offered = BufferPoolConfig {
            domain: MemoryDomain::Device,
            allocator: Some(AllocatorId(8)),
            size: 1 << 20,
            min_buffers: 16,
            max_buffers: 16,
            needs_video_meta: true,
        };
        let pool = decide_pool(
            Some(offered),
            &info,
            MemoryDomain::Device,
            Some(AllocatorId(3)),
            &supported,
        )
        .unwrap();
        assert_eq!(pool, propose_pool(&info, MemoryDomain::Device, Some(AllocatorId(3))));
    }

    #[test]
    fn pool_config_round_trips_through_serde() {
        let info = VideoFormatInfo::new(PixelFormat::I420, 32, 32);
        let pool = propose_pool(&info, MemoryDomain::System, None);
        let json = serde_json::to_string(&pool).unwrap();
        assert_eq!(serde_json::from_str::<BufferPoolConfig>(&json).unwrap(), pool);
    }
}
