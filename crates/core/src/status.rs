//! Storage capability diagnostics and the persistence verdict derived from them.

use serde::{Deserialize, Serialize};

/// Snapshot of the host's storage capabilities, captured once per worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub secure_context: bool,
    /// The durable storage API exists at all.
    pub durable_api_present: bool,
    /// A probe file could actually be created through it.
    pub durable_api_accessible: bool,
    pub storage_estimate: Option<StorageEstimate>,
    pub isolation_headers: Option<IsolationHeaders>,
    pub cross_origin_isolated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEstimate {
    pub quota: Option<u64>,
    pub usage: Option<u64>,
}

/// Response headers that decide cross-origin isolation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsolationHeaders {
    pub cross_origin_opener_policy: Option<String>,
    pub cross_origin_embedder_policy: Option<String>,
}

impl IsolationHeaders {
    /// Both headers set to the values that grant isolation.
    pub fn grants_isolation(&self) -> bool {
        let coop = self.cross_origin_opener_policy.as_deref().map(str::trim);
        let coep = self.cross_origin_embedder_policy.as_deref().map(str::trim);
        coop == Some("same-origin") && matches!(coep, Some("require-corp" | "credentialless"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransientReason {
    /// The durable backend failed to open for a reason the flags don't explain.
    #[serde(rename = "indexeddb-error")]
    BackendError,
    NotSecureContext,
    NotCrossOriginIsolated,
}

impl TransientReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BackendError => "indexeddb-error",
            Self::NotSecureContext => "not-secure-context",
            Self::NotCrossOriginIsolated => "not-cross-origin-isolated",
        }
    }

    /// Text for the dismissible storage warning.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::BackendError => {
                "Failed to create persistent storage. Your data will not be saved when you close the app."
            },
            Self::NotSecureContext | Self::NotCrossOriginIsolated => {
                "Your data is being stored temporarily and will be lost when you close the app."
            },
        }
    }
}

impl std::fmt::Display for TransientReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum StorageStatus {
    Persistent { diagnostics: Diagnostics },
    Transient { reason: TransientReason, diagnostics: Diagnostics },
}

impl StorageStatus {
    /// Decide the verdict after the durable backend was (or wasn't) opened.
    ///
    /// Reasons are checked in a fixed order and only the first match is
    /// reported: insecure context, then missing isolation, then unknown.
    pub fn classify(opened_durable: bool, diagnostics: Diagnostics) -> Self {
        if opened_durable {
            return Self::Persistent { diagnostics };
        }
        let reason = if !diagnostics.secure_context {
            TransientReason::NotSecureContext
        } else if !diagnostics.cross_origin_isolated {
            TransientReason::NotCrossOriginIsolated
        } else {
            TransientReason::BackendError
        };
        Self::Transient { reason, diagnostics }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent { .. })
    }

    pub fn reason(&self) -> Option<TransientReason> {
        match self {
            Self::Persistent { .. } => None,
            Self::Transient { reason, .. } => Some(*reason),
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        match self {
            Self::Persistent { diagnostics } | Self::Transient { diagnostics, .. } => diagnostics,
        }
    }

    /// Warning to surface to the user, `None` when data persists.
    pub fn notification(&self) -> Option<&'static str> {
        self.reason().map(TransientReason::user_message)
    }
}
