//! Characteristic Binding Policy
//!
//! Picks the write and notify channels from the discovered GATT tree.
//! First match in registry order wins, so the result only depends on the
//! order services and characteristics were discovered in.

use crate::domain::models::{CharacteristicRecord, CharacteristicRef, ServiceRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BindingDecision {
    /// First characteristic supporting write or write-without-response
    pub write: Option<CharacteristicRef>,
    /// First characteristic supporting notify or indicate
    pub notify: Option<CharacteristicRef>,
}

pub fn select_channels(services: &[ServiceRecord]) -> BindingDecision {
    let mut decision = BindingDecision::default();

    for characteristic in services.iter().flat_map(|s| s.characteristics.iter()) {
        if decision.write.is_none() && characteristic.properties.can_write() {
            decision.write = Some(characteristic.reference());
        }
        if decision.notify.is_none() && characteristic.properties.can_notify() {
            decision.notify = Some(characteristic.reference());
        }
        if decision.write.is_some() && decision.notify.is_some() {
            break;
        }
    }

    decision
}

/// Look up a characteristic by reference in the registry
pub fn find<'a>(
    services: &'a [ServiceRecord],
    reference: &CharacteristicRef,
) -> Option<&'a CharacteristicRecord> {
    services
        .iter()
        .filter(|s| s.uuid == reference.service)
        .flat_map(|s| s.characteristics.iter())
        .find(|c| c.uuid == reference.characteristic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::CharacteristicProperties;
    use uuid::Uuid;

    fn characteristic(service: u128, id: u128, props: CharacteristicProperties) -> CharacteristicRecord {
        CharacteristicRecord {
            uuid: Uuid::from_u128(id),
            properties: props,
            service: Uuid::from_u128(service),
        }
    }

    fn notify() -> CharacteristicProperties {
        CharacteristicProperties {
            notify: true,
            ..Default::default()
        }
    }

    fn write() -> CharacteristicProperties {
        CharacteristicProperties {
            write: true,
            ..Default::default()
        }
    }

    fn read() -> CharacteristicProperties {
        CharacteristicProperties {
            read: true,
            ..Default::default()
        }
    }

    fn tree() -> Vec<ServiceRecord> {
        vec![
            ServiceRecord {
                uuid: Uuid::from_u128(1),
                characteristics: vec![characteristic(1, 10, read()), characteristic(1, 11, notify())],
            },
            ServiceRecord {
                uuid: Uuid::from_u128(2),
                characteristics: vec![
                    characteristic(2, 20, write()),
                    characteristic(2, 21, write()),
                    characteristic(
                        2,
                        22,
                        CharacteristicProperties {
                            indicate: true,
                            ..Default::default()
                        },
                    ),
                ],
            },
        ]
    }

    #[test]
    fn test_first_matches_across_services() {
        let decision = select_channels(&tree());
        assert_eq!(
            decision.write.map(|c| c.characteristic),
            Some(Uuid::from_u128(20))
        );
        assert_eq!(
            decision.notify.map(|c| c.characteristic),
            Some(Uuid::from_u128(11))
        );
    }

    #[test]
    fn test_selection_is_deterministic() {
        let services = tree();
        let first = select_channels(&services);
        for _ in 0..10 {
            assert_eq!(select_channels(&services), first);
        }
    }

    #[test]
    fn test_write_without_response_and_indicate_qualify() {
        let services = vec![ServiceRecord {
            uuid: Uuid::from_u128(5),
            characteristics: vec![
                characteristic(
                    5,
                    50,
                    CharacteristicProperties {
                        write_without_response: true,
                        ..Default::default()
                    },
                ),
                characteristic(
                    5,
                    51,
                    CharacteristicProperties {
                        indicate: true,
                        ..Default::default()
                    },
                ),
            ],
        }];
        let decision = select_channels(&services);
        assert!(decision.write.is_some());
        assert!(decision.notify.is_some());
    }

    #[test]
    fn test_nothing_selectable() {
        let services = vec![ServiceRecord {
            uuid: Uuid::from_u128(1),
            characteristics: vec![characteristic(1, 10, read())],
        }];
        assert_eq!(select_channels(&services), BindingDecision::default());
        assert_eq!(select_channels(&[]), BindingDecision::default());
    }

    #[test]
    fn test_find_by_reference() {
        let services = tree();
        let reference = CharacteristicRef {
            service: Uuid::from_u128(2),
            characteristic: Uuid::from_u128(21),
        };
        assert!(find(&services, &reference).is_some());

        let wrong_service = CharacteristicRef {
            service: Uuid::from_u128(1),
            characteristic: Uuid::from_u128(21),
        };
        assert!(find(&services, &wrong_service).is_none());
    }
}
