use std::collections::HashSet;

use locker_core::config::HardwareConfig;
use locker_core::error::{LockerError, Result};

/// Configured relay cards, enforcing §4.6's "`card_address` must exist in
/// the hardware table or the call fails with `UnknownCardError` (no
/// implicit provisioning)".
pub struct HardwareTable {
    enabled_cards: HashSet<u8>,
}

impl HardwareTable {
    pub fn from_config(config: &HardwareConfig) -> Self {
        let enabled_cards = config
            .relay_cards
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.slave_address)
            .collect();
        Self { enabled_cards }
    }

    pub fn require_card(&self, card_address: u8) -> Result<()> {
        if self.enabled_cards.contains(&card_address) {
            Ok(())
        } else {
            Err(LockerError::UnknownCard(card_address))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use locker_core::config::RelayCardConfig;

    #[test]
    fn rejects_a_card_not_in_the_table() {
        let table = HardwareTable::from_config(&HardwareConfig {
            relay_cards: vec![RelayCardConfig {
                slave_address: 1,
                channels: 16,
                enabled: true,
            }],
        });
        assert!(table.require_card(1).is_ok());
        assert!(matches!(
            table.require_card(2),
            Err(LockerError::UnknownCard(2))
        ));
    }

    #[test]
    fn rejects_a_disabled_card() {
        let table = HardwareTable::from_config(&HardwareConfig {
            relay_cards: vec![RelayCardConfig {
                slave_address: 1,
                channels: 16,
                enabled: false,
            }],
        });
        assert!(table.require_card(1).is_err());
    }
}
