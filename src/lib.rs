// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Component orchestration for bootstrapping a developer environment.
//!
//! A machine is described by a __registry__ of components. Each component
//! names exactly one provider: the OS package manager, the language module
//! gallery, a secondary package manager, a synced configuration repository, or
//! custom actions. The same registry drives three operations, install,
//! validate, and update, so every operation sees the identical set of
//! components in the identical order.
//!
//! # Layout
//!
//! 1. [`registry`] holds the ordered listing of [`component`] descriptors
//!    loaded from the TOML layout of [`config`].
//! 2. [`provider`] dispatches one operation on one component to the
//!    component's provider strategy under a hard wall-clock bound.
//! 3. [`runner`] drives a full pass over the registry, fail soft.
//! 4. [`failure`] persists every failure, and advises on remediation.
//!
//! Running twice in a row against a fully installed environment does nothing
//! but check that everything is already there.

pub mod component;
pub mod config;
pub mod failure;
pub mod host;
pub mod path;
pub mod provider;
pub mod registry;
pub mod report;
pub mod runner;
