#![expect(
    clippy::module_name_repetitions,
    reason = "Subscription types deliberately include the module name for clarity"
)]

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};

use super::envelope::MessageEnvelope;

/// Server acknowledgment of the last `subscribe` request.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    /// Types the server reported as active
    pub types: Vec<String>,
    /// When the acknowledgment arrived
    pub received_at: DateTime<Utc>,
}

/// Desired set of data types for one feed.
///
/// The set outlives individual connections. Each time a connection opens, the whole set
/// is sent as one `subscribe` request; the server replaces whatever it held before, so a
/// server without memory of the prior connection still ends up with the full set.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    types: RwLock<Vec<String>>,
    confirmation: RwLock<Option<Confirmation>>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add data types. Returns whether the set changed.
    pub fn subscribe<I, S>(&self, types: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        // Recoverable on poison: the set is only ever mutated by whole-element pushes/removals.
        let mut current = self.types.write().unwrap_or_else(PoisonError::into_inner);
        let before = current.len();

        for data_type in types {
            let data_type = data_type.into();
            if !current.contains(&data_type) {
                current.push(data_type);
            }
        }

        current.len() != before
    }

    /// Remove data types. Returns whether the set changed.
    pub fn unsubscribe<I, S>(&self, types: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut current = self.types.write().unwrap_or_else(PoisonError::into_inner);
        let before = current.len();

        for data_type in types {
            current.retain(|existing| existing != data_type.as_ref());
        }

        current.len() != before
    }

    /// Current set in subscription order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn contains(&self, data_type: &str) -> bool {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|existing| existing == data_type)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `subscribe` request for the full current set, even when it is empty.
    #[must_use]
    pub fn request(&self) -> MessageEnvelope {
        MessageEnvelope::subscribe(&self.snapshot())
    }

    /// Request to send right after a connection opens. Nothing is sent for an empty set.
    #[must_use]
    pub fn replay(&self) -> Option<MessageEnvelope> {
        let types = self.snapshot();
        (!types.is_empty()).then(|| MessageEnvelope::subscribe(&types))
    }

    /// Record a `subscription_confirmed` message.
    ///
    /// A payload that is an array of strings, or an object with such a `types` array, is
    /// taken as the confirmed set; anything else confirms the current set.
    pub fn confirm(&self, envelope: &MessageEnvelope) {
        let listed = envelope
            .payload
            .get("types")
            .unwrap_or(&envelope.payload)
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_owned))
                    .collect::<Vec<_>>()
            });

        let confirmation = Confirmation {
            types: listed.unwrap_or_else(|| self.snapshot()),
            received_at: envelope.timestamp,
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(types = ?confirmation.types, "Subscription confirmed");

        *self
            .confirmation
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(confirmation);
    }

    /// Last acknowledgment received on the current connection.
    #[must_use]
    pub fn confirmation(&self) -> Option<Confirmation> {
        self.confirmation
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forget the acknowledgment; called whenever a connection ends.
    pub fn clear_confirmation(&self) {
        *self
            .confirmation
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}
