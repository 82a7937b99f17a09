//! Synthesis of the wire records a registered service occupies.
//!
//! Every service owns four records (RFC 6763 section 12): the shared
//! PTR from its type to the instance, and the unique SRV, TXT, and A
//! sets.  Unique records carry the cache-flush bit and the service
//! TTL of 120 seconds; the host's A record lives longer at 4500
//! seconds (RFC 6762 section 10).

use crate::protocol::wire_types::{
    DomainName, RecordClass, RecordTypeWithData, ResourceRecord, HOSTNAME_RECORD_TTL,
    SERVICE_RECORD_TTL,
};
use crate::service::{Service, ServiceNames};

/// The full record set for a service, in [PTR, SRV, TXT, A] order.
pub(crate) fn build_record_set(service: &Service, names: &ServiceNames) -> Vec<ResourceRecord> {
    vec![
        ptr_record(service, names),
        srv_record(service, names),
        txt_record(service, names),
        a_record(service, names),
    ]
}

/// The PTR from service type to instance.  PTR sets are shared across
/// responders, so the cache-flush bit stays off.
pub(crate) fn ptr_record(_service: &Service, names: &ServiceNames) -> ResourceRecord {
    ResourceRecord {
        name: names.type_name.clone(),
        rtype_with_data: RecordTypeWithData::PTR {
            ptrdname: names.instance.clone(),
        },
        cache_flush: false,
        rclass: RecordClass::IN,
        ttl: SERVICE_RECORD_TTL,
    }
}

pub(crate) fn srv_record(service: &Service, names: &ServiceNames) -> ResourceRecord {
    ResourceRecord {
        name: names.instance.clone(),
        rtype_with_data: RecordTypeWithData::SRV {
            priority: 0,
            weight: 0,
            port: service.port,
            target: names.hostname.clone(),
        },
        cache_flush: true,
        rclass: RecordClass::IN,
        ttl: SERVICE_RECORD_TTL,
    }
}

pub(crate) fn txt_record(service: &Service, names: &ServiceNames) -> ResourceRecord {
    ResourceRecord {
        name: names.instance.clone(),
        rtype_with_data: RecordTypeWithData::TXT {
            octets: service.txt.to_rdata(),
        },
        cache_flush: true,
        rclass: RecordClass::IN,
        ttl: SERVICE_RECORD_TTL,
    }
}

pub(crate) fn a_record(service: &Service, names: &ServiceNames) -> ResourceRecord {
    ResourceRecord {
        name: names.hostname.clone(),
        rtype_with_data: RecordTypeWithData::A {
            address: service.ipv4,
        },
        cache_flush: true,
        rclass: RecordClass::IN,
        ttl: HOSTNAME_RECORD_TTL,
    }
}

/// One PTR for the `_services._dns-sd._udp.local.` meta-query,
/// pointing at an advertised service type (RFC 6763 section 9).
pub(crate) fn meta_ptr_record(meta_name: &DomainName, type_name: &DomainName) -> ResourceRecord {
    ResourceRecord {
        name: meta_name.clone(),
        rtype_with_data: RecordTypeWithData::PTR {
            ptrdname: type_name.clone(),
        },
        cache_flush: false,
        rclass: RecordClass::IN,
        ttl: SERVICE_RECORD_TTL,
    }
}

/// The record set with every TTL forced to zero: the goodbye packet
/// (RFC 6762 section 10.1).
pub(crate) fn goodbye_record_set(service: &Service, names: &ServiceNames) -> Vec<ResourceRecord> {
    let mut records = build_record_set(service, names);
    for record in &mut records {
        record.ttl = 0;
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_types::RecordType;
    use crate::service::test_util::service;
    use crate::service::TxtData;
    use std::net::Ipv4Addr;

    fn sample() -> (Service, ServiceNames) {
        let mut svc = service(
            "printer1",
            "_http._tcp.local.",
            "printer1.local.",
            [192, 168, 1, 50],
        );
        svc.txt = TxtData::from_pairs([("path", "/")]).unwrap();
        let names = svc.validated_names().unwrap();
        (svc, names)
    }

    #[test]
    fn record_set_has_the_mandated_shape() {
        let (svc, names) = sample();
        let records = build_record_set(&svc, &names);

        assert_eq!(
            vec![RecordType::PTR, RecordType::SRV, RecordType::TXT, RecordType::A],
            records
                .iter()
                .map(|rr| rr.rtype_with_data.rtype())
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn cache_flush_is_set_on_unique_records_only() {
        let (svc, names) = sample();
        let records = build_record_set(&svc, &names);

        assert!(!records[0].cache_flush, "PTR is a shared set");
        assert!(records[1].cache_flush);
        assert!(records[2].cache_flush);
        assert!(records[3].cache_flush);
    }

    #[test]
    fn ttls_follow_rfc_6762_section_10() {
        let (svc, names) = sample();
        let records = build_record_set(&svc, &names);

        assert_eq!(120, records[0].ttl);
        assert_eq!(120, records[1].ttl);
        assert_eq!(120, records[2].ttl);
        assert_eq!(4500, records[3].ttl);
    }

    #[test]
    fn srv_carries_port_and_hostname_target() {
        let (svc, names) = sample();
        let srv = srv_record(&svc, &names);

        assert_eq!("printer1._http._tcp.local.", srv.name.to_dotted_string());
        match srv.rtype_with_data {
            RecordTypeWithData::SRV {
                priority,
                weight,
                port,
                target,
            } => {
                assert_eq!(0, priority);
                assert_eq!(0, weight);
                assert_eq!(8080, port);
                assert_eq!("printer1.local.", target.to_dotted_string());
            }
            other => panic!("not an SRV: {other:?}"),
        }
    }

    #[test]
    fn a_record_rdata_is_the_address() {
        let (svc, names) = sample();
        let a = a_record(&svc, &names);

        assert_eq!("printer1.local.", a.name.to_dotted_string());
        assert_eq!(
            RecordTypeWithData::A {
                address: Ipv4Addr::new(192, 168, 1, 50)
            },
            a.rtype_with_data
        );
    }

    #[test]
    fn empty_txt_still_produces_a_record() {
        let (mut svc, names) = sample();
        svc.txt = TxtData::new();

        match txt_record(&svc, &names).rtype_with_data {
            RecordTypeWithData::TXT { octets } => assert_eq!(vec![0], octets),
            other => panic!("not a TXT: {other:?}"),
        }
    }

    #[test]
    fn goodbye_zeroes_every_ttl() {
        let (svc, names) = sample();
        assert!(goodbye_record_set(&svc, &names)
            .iter()
            .all(|rr| rr.ttl == 0));
    }
}
