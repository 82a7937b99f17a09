//! Turning an accepted query into the records we should answer with.
//!
//! Per RFC 6763 section 12, answers carry their natural additionals:
//! a PTR answer brings the instance's SRV/TXT/A along, an SRV or TXT
//! answer brings the host's A record.  Known answers the querier
//! already holds at half their TTL or better are suppressed (RFC 6762
//! section 7.1).

use std::collections::HashSet;

use crate::protocol::wire_types::{
    DomainName, Message, QueryType, RecordType, ResourceRecord, META_QUERY_NAME,
};
use crate::responder::records;
use crate::responder::registry::RegisteredService;

/// The records to answer one query with, before pacing.
#[derive(Debug, Default)]
pub(crate) struct AnswerSet {
    pub answers: Vec<ResourceRecord>,
    pub additionals: Vec<ResourceRecord>,
}

impl AnswerSet {
    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}

/// The meta-query name, parsed.
pub(crate) fn meta_query_name() -> DomainName {
    // the constant is a valid dotted name
    DomainName::from_dotted_string(META_QUERY_NAME).expect("META_QUERY_NAME parses")
}

pub(crate) fn build_answers(services: &[RegisteredService], query: &Message) -> AnswerSet {
    let meta_name = meta_query_name();

    let mut answers = Vec::new();
    let mut answer_keys = HashSet::new();
    let mut additionals = Vec::new();
    let mut additional_keys = HashSet::new();

    for question in &query.questions {
        if question.name == meta_name {
            if RecordType::PTR.matches(&question.qtype) {
                let mut seen_types = HashSet::new();
                for rs in services {
                    if seen_types.insert(rs.names.type_name.lowercased_octets()) {
                        push(
                            &mut answers,
                            &mut answer_keys,
                            records::meta_ptr_record(&meta_name, &rs.names.type_name),
                        );
                    }
                }
            }
            continue;
        }

        for rs in services {
            answer_for_service(
                rs,
                question.name.clone(),
                question.qtype,
                &mut answers,
                &mut answer_keys,
                &mut additionals,
                &mut additional_keys,
            );
        }
    }

    // known-answer suppression: the query's answer section lists what
    // the querier already believes, with its remaining TTLs
    for known in &query.answers {
        let key = known.key();
        answers.retain(|ours| !(known.ttl >= ours.ttl / 2 && ours.key() == key));
        additionals.retain(|ours| !(known.ttl >= ours.ttl / 2 && ours.key() == key));
    }

    // an additional that also made it into the answers is redundant
    let answer_keys: HashSet<Vec<u8>> = answers.iter().map(ResourceRecord::key).collect();
    additionals.retain(|rr| !answer_keys.contains(&rr.key()));

    AnswerSet {
        answers,
        additionals,
    }
}

#[allow(clippy::too_many_arguments)]
fn answer_for_service(
    rs: &RegisteredService,
    qname: DomainName,
    qtype: QueryType,
    answers: &mut Vec<ResourceRecord>,
    answer_keys: &mut HashSet<Vec<u8>>,
    additionals: &mut Vec<ResourceRecord>,
    additional_keys: &mut HashSet<Vec<u8>>,
) {
    let service = &rs.service;
    let names = &rs.names;

    if qname == names.type_name && RecordType::PTR.matches(&qtype) {
        push(answers, answer_keys, records::ptr_record(service, names));
        push(
            additionals,
            additional_keys,
            records::srv_record(service, names),
        );
        push(
            additionals,
            additional_keys,
            records::txt_record(service, names),
        );
        push(
            additionals,
            additional_keys,
            records::a_record(service, names),
        );
    }

    if qname == names.instance {
        if RecordType::SRV.matches(&qtype) {
            push(answers, answer_keys, records::srv_record(service, names));
            push(
                additionals,
                additional_keys,
                records::a_record(service, names),
            );
        }
        if RecordType::TXT.matches(&qtype) {
            push(answers, answer_keys, records::txt_record(service, names));
            push(
                additionals,
                additional_keys,
                records::a_record(service, names),
            );
        }
    }

    if qname == names.hostname && RecordType::A.matches(&qtype) {
        push(answers, answer_keys, records::a_record(service, names));
    }
}

fn push(records: &mut Vec<ResourceRecord>, keys: &mut HashSet<Vec<u8>>, record: ResourceRecord) {
    if keys.insert(record.key()) {
        records.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_types::test_util::*;
    use crate::protocol::wire_types::{QueryType, RecordTypeWithData};
    use crate::service::test_util::service;
    use crate::service::ServiceState;

    fn registered(instance: &str, service_type: &str, host: &str, ip: [u8; 4]) -> RegisteredService {
        let svc = service(instance, service_type, host, ip);
        let names = svc.validated_names().unwrap();
        RegisteredService {
            service: svc,
            names,
            state: ServiceState::Responding,
        }
    }

    fn query_for(name: &str, qtype: QueryType) -> Message {
        Message::query(vec![question(name, qtype)])
    }

    #[test]
    fn ptr_question_brings_srv_txt_a_additionals() {
        let services = vec![registered(
            "printer1",
            "_http._tcp.local.",
            "printer1.local.",
            [192, 168, 1, 50],
        )];
        let query = query_for("_http._tcp.local.", QueryType::Record(RecordType::PTR));

        let set = build_answers(&services, &query);

        assert_eq!(1, set.answers.len());
        assert_eq!(RecordType::PTR, set.answers[0].rtype_with_data.rtype());
        assert_eq!(
            vec![RecordType::SRV, RecordType::TXT, RecordType::A],
            set.additionals
                .iter()
                .map(|rr| rr.rtype_with_data.rtype())
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn srv_question_brings_the_a_additional() {
        let services = vec![registered(
            "printer1",
            "_http._tcp.local.",
            "printer1.local.",
            [192, 168, 1, 50],
        )];
        let query = query_for(
            "printer1._http._tcp.local.",
            QueryType::Record(RecordType::SRV),
        );

        let set = build_answers(&services, &query);

        assert_eq!(1, set.answers.len());
        assert_eq!(RecordType::SRV, set.answers[0].rtype_with_data.rtype());
        assert_eq!(1, set.additionals.len());
        assert_eq!(RecordType::A, set.additionals[0].rtype_with_data.rtype());
    }

    #[test]
    fn any_question_for_an_instance_yields_srv_and_txt() {
        let services = vec![registered(
            "printer1",
            "_http._tcp.local.",
            "printer1.local.",
            [192, 168, 1, 50],
        )];
        let query = query_for("printer1._http._tcp.local.", QueryType::Wildcard);

        let set = build_answers(&services, &query);

        assert_eq!(
            vec![RecordType::SRV, RecordType::TXT],
            set.answers
                .iter()
                .map(|rr| rr.rtype_with_data.rtype())
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn hostname_question_yields_the_a_record() {
        let services = vec![registered(
            "printer1",
            "_http._tcp.local.",
            "printer1.local.",
            [192, 168, 1, 50],
        )];
        let query = query_for("printer1.local.", QueryType::Record(RecordType::A));

        let set = build_answers(&services, &query);

        assert_eq!(1, set.answers.len());
        assert_eq!(
            RecordTypeWithData::A {
                address: [192, 168, 1, 50].into()
            },
            set.answers[0].rtype_with_data
        );
        assert!(set.additionals.is_empty());
    }

    #[test]
    fn instance_name_matching_is_case_insensitive() {
        let services = vec![registered(
            "Printer One",
            "_http._tcp.local.",
            "printer1.local.",
            [192, 168, 1, 50],
        )];
        let query = query_for(
            "printer one._http._tcp.local.",
            QueryType::Record(RecordType::SRV),
        );

        assert_eq!(1, build_answers(&services, &query).answers.len());
    }

    #[test]
    fn meta_query_lists_each_distinct_service_type_once() {
        let services = vec![
            registered("printer1", "_http._tcp.local.", "a.local.", [10, 0, 0, 1]),
            registered("printer2", "_http._tcp.local.", "b.local.", [10, 0, 0, 2]),
            registered("queue", "_printer._tcp.local.", "c.local.", [10, 0, 0, 3]),
        ];
        let query = query_for(META_QUERY_NAME, QueryType::Record(RecordType::PTR));

        let set = build_answers(&services, &query);

        let mut targets: Vec<String> = set
            .answers
            .iter()
            .map(|rr| match &rr.rtype_with_data {
                RecordTypeWithData::PTR { ptrdname } => ptrdname.to_dotted_string(),
                other => panic!("not a PTR: {other:?}"),
            })
            .collect();
        targets.sort();

        assert_eq!(
            vec!["_http._tcp.local.".to_string(), "_printer._tcp.local.".to_string()],
            targets
        );
        assert!(set.answers.iter().all(|rr| !rr.cache_flush));
    }

    #[test]
    fn known_answers_at_half_ttl_are_suppressed() {
        let services = vec![registered(
            "printer1",
            "_http._tcp.local.",
            "printer1.local.",
            [192, 168, 1, 50],
        )];

        // our PTR has TTL 120; a known answer at TTL 100 (>= 60)
        // suppresses it
        let mut query = query_for("_http._tcp.local.", QueryType::Record(RecordType::PTR));
        let mut known = ptr_record("_http._tcp.local.", "printer1._http._tcp.local.");
        known.ttl = 100;
        query.answers.push(known);

        let set = build_answers(&services, &query);
        assert!(set.answers.is_empty());
    }

    #[test]
    fn stale_known_answers_do_not_suppress() {
        let services = vec![registered(
            "printer1",
            "_http._tcp.local.",
            "printer1.local.",
            [192, 168, 1, 50],
        )];

        let mut query = query_for("_http._tcp.local.", QueryType::Record(RecordType::PTR));
        let mut known = ptr_record("_http._tcp.local.", "printer1._http._tcp.local.");
        known.ttl = 59; // below the 60-second half-life
        query.answers.push(known);

        let set = build_answers(&services, &query);
        assert_eq!(1, set.answers.len());
    }

    #[test]
    fn known_answers_for_other_instances_do_not_suppress() {
        let services = vec![registered(
            "printer1",
            "_http._tcp.local.",
            "printer1.local.",
            [192, 168, 1, 50],
        )];

        let mut query = query_for("_http._tcp.local.", QueryType::Record(RecordType::PTR));
        let mut known = ptr_record("_http._tcp.local.", "other._http._tcp.local.");
        known.ttl = 120;
        query.answers.push(known);

        assert_eq!(1, build_answers(&services, &query).answers.len());
    }

    #[test]
    fn unrelated_questions_get_no_answer() {
        let services = vec![registered(
            "printer1",
            "_http._tcp.local.",
            "printer1.local.",
            [192, 168, 1, 50],
        )];
        let query = query_for("_ipp._tcp.local.", QueryType::Record(RecordType::PTR));

        assert!(build_answers(&services, &query).is_empty());
    }

    #[test]
    fn shared_hostnames_are_answered_once() {
        let services = vec![
            registered("svc1", "_http._tcp.local.", "host.local.", [10, 0, 0, 1]),
            registered("svc2", "_ipp._tcp.local.", "host.local.", [10, 0, 0, 1]),
        ];
        let query = query_for("host.local.", QueryType::Record(RecordType::A));

        // both services advertise the same A record; it appears once
        assert_eq!(1, build_answers(&services, &query).answers.len());
    }
}
