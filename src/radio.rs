use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use tracing::debug;

pub const COEXISTENCE_RADIO_COUNT: usize = 4;

/// Short-range radios that may interfere with the satellite link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoexistenceRadio {
    Bluetooth,
    Wifi,
    Nfc,
    Uwb,
}

impl CoexistenceRadio {
    pub const ALL: [CoexistenceRadio; COEXISTENCE_RADIO_COUNT] = [
        CoexistenceRadio::Bluetooth,
        CoexistenceRadio::Wifi,
        CoexistenceRadio::Nfc,
        CoexistenceRadio::Uwb,
    ];

    const fn index(self) -> usize {
        match self {
            CoexistenceRadio::Bluetooth => 0,
            CoexistenceRadio::Wifi => 1,
            CoexistenceRadio::Nfc => 2,
            CoexistenceRadio::Uwb => 3,
        }
    }
}

// `ALL` order must match the flag slots.
const fn indices_follow_all() -> bool {
    let mut i = 0;
    while i < COEXISTENCE_RADIO_COUNT {
        if CoexistenceRadio::ALL[i].index() != i {
            return false;
        }
        i += 1;
    }
    true
}

const_assert!(indices_follow_all());

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioFlags {
    pub must_quiesce: bool,
    pub enabled: bool,
}

/// Per-radio interference flags.
///
/// Radios start out assumed enabled until a state notification says otherwise,
/// so a radio that must be quiesced is never treated as quiet before it reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioCoexistence {
    flags: [RadioFlags; COEXISTENCE_RADIO_COUNT],
}

impl RadioCoexistence {
    pub fn new(must_quiesce: &[CoexistenceRadio]) -> Self {
        let mut flags = [RadioFlags { must_quiesce: false, enabled: true }; COEXISTENCE_RADIO_COUNT];
        for radio in must_quiesce {
            flags[radio.index()].must_quiesce = true;
        }
        Self { flags }
    }

    /// Record a radio state notification. Returns true if the flag changed.
    pub fn set_enabled(&mut self, radio: CoexistenceRadio, enabled: bool) -> bool {
        let slot = &mut self.flags[radio.index()];
        let changed = slot.enabled != enabled;
        slot.enabled = enabled;
        debug!(?radio, enabled, must_quiesce = slot.must_quiesce, "radio state updated");
        changed
    }

    pub fn flags(&self, radio: CoexistenceRadio) -> RadioFlags {
        self.flags[radio.index()]
    }

    /// True once every radio that must be quiesced reports disabled.
    pub fn all_quiesced(&self) -> bool {
        self.flags.iter().all(|f| !f.must_quiesce || !f.enabled)
    }

    pub fn still_enabled(&self) -> impl Iterator<Item = CoexistenceRadio> + '_ {
        CoexistenceRadio::ALL
            .into_iter()
            .filter(|r| {
                let f = self.flags[r.index()];
                f.must_quiesce && f.enabled
            })
    }
}
