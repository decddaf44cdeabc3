// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod caps;
pub mod copier;
pub mod device;
pub mod domain;
pub mod error;
pub mod executor;
pub mod format;
pub mod frame;
pub mod geometry;
pub mod interop;
pub mod planner;
