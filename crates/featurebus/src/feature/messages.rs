// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lifecycle messages exchanged between features and the host.

use crate::message::Message;

/// A feature finished initialising.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FeatureInitialised {
    /// Registered name of the feature.
    pub feature: String,
}

impl Message for FeatureInitialised {
    fn on_recycle(&mut self) {
        self.feature.clear();
    }
}

/// Every registered feature is ready.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StartGame;

impl Message for StartGame {}
