//! localcast is a link-local Multicast DNS (RFC 6762) and DNS-Based
//! Service Discovery (RFC 6763) library for IPv4: a one-shot
//! [`Querier`] that multicasts questions and collects answers, and a
//! [`Responder`] that claims service names on the local link -
//! probing for conflicts, announcing, answering queries, and saying
//! goodbye on the way out.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use localcast::{Config, Querier, RecordType, Responder, Service, TxtData};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), localcast::Error> {
//!     let responder = Responder::new(Config::default())?;
//!     let mut registration = responder.register(Service {
//!         instance_name: "My Printer".to_string(),
//!         service_type: "_http._tcp.local.".to_string(),
//!         hostname: "printer1.local.".to_string(),
//!         port: 8080,
//!         txt: TxtData::new(),
//!         ipv4: [192, 168, 1, 50].into(),
//!     })?;
//!     registration.wait_until_responding().await?;
//!
//!     let querier = Querier::new(Config::default())?;
//!     let records = querier
//!         .query("printer1.local.", RecordType::A, Duration::from_secs(2))
//!         .await?;
//!     println!("{records:?}");
//!
//!     querier.close().await?;
//!     responder.close().await
//! }
//! ```
//!
//! Both endpoints share the same ingress discipline: datagrams over
//! 9000 octets, from off-link sources, or from sources over the
//! per-second rate limit are dropped before parsing.  Everything
//! outbound goes through per-(record, interface) multicast pacing.
//!
//! IPv6, response caching, and continuous queries are out of scope
//! for this revision.

#![warn(clippy::pedantic)]
// Don't care enough to fix
#![allow(clippy::match_same_arms)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::wildcard_imports)]

pub mod config;
pub mod errors;
pub mod ingress;
pub mod interfaces;
pub mod net_util;
pub mod protocol;
pub mod querier;
pub mod responder;
pub mod service;

#[doc(inline)]
pub use crate::config::Config;
#[doc(inline)]
pub use crate::errors::Error;
#[doc(inline)]
pub use crate::ingress::IngressStats;
#[doc(inline)]
pub use crate::interfaces::{default_interfaces, NetInterface};
#[doc(inline)]
pub use crate::protocol::wire_types::{
    DomainName, Message, QueryType, Question, RecordType, RecordTypeWithData, ResourceRecord,
};
#[doc(inline)]
pub use crate::querier::Querier;
#[doc(inline)]
pub use crate::responder::{Registration, Responder, ServiceDiagnostics};
#[doc(inline)]
pub use crate::service::{Service, ServiceState, TxtData};
