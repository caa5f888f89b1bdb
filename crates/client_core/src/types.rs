use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::domain::{CoupleId, PartnerSummary};

/// Snapshot of the pairing state published to UI consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingState {
    pub couple_id: Option<CoupleId>,
    pub has_partner: bool,
    pub partner: Option<PartnerSummary>,
    pub my_code: Option<String>,
    pub code_expires_at: Option<DateTime<Utc>>,
    pub loading: bool,
}

impl PairingState {
    /// State of a freshly started session: nothing known yet, first load pending.
    pub fn initial() -> Self {
        Self {
            loading: true,
            ..Self::default()
        }
    }

    pub fn phase(&self) -> PairingPhase {
        if self.has_partner {
            PairingPhase::Paired
        } else if self.my_code.is_some() {
            PairingPhase::CodeGenerated
        } else {
            PairingPhase::Unpaired
        }
    }

    pub fn should_poll(&self) -> bool {
        self.my_code.is_some() && !self.has_partner
    }

    /// Drops everything known about the couple. Returns whether anything changed.
    pub(crate) fn clear_partner(&mut self) -> bool {
        let changed = self.couple_id.is_some() || self.has_partner || self.partner.is_some();
        self.couple_id = None;
        self.has_partner = false;
        self.partner = None;
        changed
    }

    pub(crate) fn clear_code(&mut self) -> bool {
        let changed = self.my_code.is_some() || self.code_expires_at.is_some();
        self.my_code = None;
        self.code_expires_at = None;
        changed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingPhase {
    Unpaired,
    CodeGenerated,
    Paired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingEvent {
    CodeIssued {
        code: String,
        expires_at: Option<DateTime<Utc>>,
    },
    PartnerConnected(PartnerSummary),
    PartnerDisconnected,
}
