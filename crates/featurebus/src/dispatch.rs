// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Delivery records and the in-flight letter table.
//!
//! The reference count of a sent message lives here, keyed by letter id,
//! rather than on the payload. The payload itself is owned by exactly one
//! place at a time:
//!
//! ```text
//! send()          -> Delivery (queued)          refs = N
//! batch pops it   -> owned by the dispatcher    receivers run, may release
//! settle()        -> refs == 0 ? pool : parked in the table
//! receiver_done() -> refs == 0 && parked ? pool : wait
//! ```

use crate::error::{Error, Result};
use crate::message::{Letter, Message, MessageType};
use crate::receiver::ReceiverRef;
use std::collections::HashMap;
use std::fmt;

/// One queued send: the payload plus the receivers snapshotted at send time.
pub(crate) struct Delivery {
    pub(crate) letter: Letter,
    pub(crate) message: Box<dyn Message>,
    pub(crate) receivers: Vec<ReceiverRef>,
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("letter", &self.letter)
            .field("receivers", &self.receivers.len())
            .finish()
    }
}

/// Reference state of one letter.
struct InFlight {
    remaining: usize,
    /// Payload waiting for late `receiver_done` calls once delivery finished.
    parked: Option<Box<dyn Message>>,
}

/// Outcome of releasing one reference.
pub(crate) enum Release {
    /// Other receivers still hold references.
    Pending { remaining: usize },
    /// Last reference released after delivery; the payload goes to the pool.
    Recycle(Box<dyn Message>),
    /// Last reference released while the dispatcher still owns the payload;
    /// `settle` recycles it.
    Drained,
}

/// Letters awaiting `receiver_done`, keyed by id.
#[derive(Default)]
pub(crate) struct LetterTable {
    entries: HashMap<u64, InFlight>,
    next_id: u64,
}

impl LetterTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn next_letter(&mut self, message_type: MessageType) -> Letter {
        self.next_id = self.next_id.wrapping_add(1);
        Letter::new(self.next_id, message_type)
    }

    /// Letter for a send with no receivers; nothing is tracked.
    pub(crate) fn unrouted(&mut self, message_type: MessageType) -> Letter {
        self.next_letter(message_type)
    }

    /// Start tracking a send delivered to `refs` receivers.
    pub(crate) fn open(&mut self, message_type: MessageType, refs: usize) -> Letter {
        debug_assert!(refs > 0, "zero-receiver sends are not tracked");
        let letter = self.next_letter(message_type);
        self.entries.insert(
            letter.id(),
            InFlight {
                remaining: refs,
                parked: None,
            },
        );
        letter
    }

    /// Release one reference.
    ///
    /// Releasing a letter that is unknown, already recycled, or already at
    /// zero is reported as [`Error::UnknownLetter`] and changes nothing.
    pub(crate) fn release(&mut self, letter: Letter) -> Result<Release> {
        let id = letter.id();
        let entry = match self.entries.get_mut(&id) {
            Some(entry) if entry.remaining > 0 => entry,
            _ => return Err(Error::UnknownLetter { id }),
        };

        entry.remaining -= 1;
        if entry.remaining > 0 {
            return Ok(Release::Pending {
                remaining: entry.remaining,
            });
        }

        if entry.parked.is_some() {
            let message = self.entries.remove(&id).and_then(|entry| entry.parked);
            return Ok(match message {
                Some(message) => Release::Recycle(message),
                None => Release::Drained,
            });
        }
        Ok(Release::Drained)
    }

    /// Called by the dispatcher once every receiver ran.
    ///
    /// Returns the payload when it must be recycled now; otherwise parks it
    /// until the outstanding references are released.
    pub(crate) fn settle(
        &mut self,
        letter: Letter,
        message: Box<dyn Message>,
    ) -> Option<Box<dyn Message>> {
        match self.entries.get_mut(&letter.id()) {
            Some(entry) if entry.remaining > 0 => {
                entry.parked = Some(message);
                None
            }
            Some(_) => {
                self.entries.remove(&letter.id());
                Some(message)
            }
            None => {
                // Table was reset mid-flight.
                Some(message)
            }
        }
    }

    /// Outstanding references for a letter, `None` once recycled.
    pub(crate) fn remaining(&self, letter: Letter) -> Option<usize> {
        self.entries.get(&letter.id()).map(|entry| entry.remaining)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
