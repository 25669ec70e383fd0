//! Credit-Control-Request
//!
//! Maps between the wire message and the engine vocabulary. The
//! Service-Information block is read (Called-Party-Address) but never
//! modified; it is re-emitted exactly as received, as are attributes we do
//! not know.

use apolo_core::config::DiameterConfig;
use apolo_core::models::SessionEvent;
use apolo_core::{AppError, AppResult};
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::avp::{find_avp, find_avp_nested, Avp, AvpData};
use crate::dictionary::{avp_code, cmd, subscription_id_type, vendor};
use crate::message::{DiameterHeader, DiameterMessage};
use crate::usage::{plan_request, resolve_usage, RequestType};

/// Event name given to events built out of CCRs
pub const CCR_EVENT_NAME: &str = "DIAMETER_CCR";

/// One Subscription-Id group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionId {
    pub id_type: u32,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditControlRequest {
    pub header: DiameterHeader,
    pub session_id: String,
    pub origin_host: String,
    pub origin_realm: String,
    pub destination_host: String,
    pub destination_realm: String,
    pub auth_application_id: u32,
    pub service_context_id: String,
    pub request_type: RequestType,
    pub request_number: u32,
    pub event_timestamp: Option<DateTime<Utc>>,
    pub subscription_ids: Vec<SubscriptionId>,
    pub service_identifier: Option<u32>,
    /// Requested-Service-Unit CC-Time
    pub requested_units: Option<Duration>,
    /// Used-Service-Unit CC-Time
    pub used_units: Option<Duration>,
    /// Opaque Service-Information block
    pub service_information: Option<Avp>,
    /// Top level attributes we do not interpret
    pub extra_avps: Vec<Avp>,
}

fn required<'a>(msg: &'a DiameterMessage, code: u32, name: &str) -> AppResult<&'a Avp> {
    msg.find_avp(code)
        .ok_or_else(|| AppError::MalformedMessage(format!("missing mandatory AVP {}", name)))
}

fn optional_string(msg: &DiameterMessage, code: u32) -> AppResult<String> {
    msg.find_avp(code)
        .map(|a| a.as_str().map(str::to_string))
        .transpose()
        .map(Option::unwrap_or_default)
}

fn cc_time(group: Option<&Avp>) -> AppResult<Option<Duration>> {
    let Some(group) = group else {
        return Ok(None);
    };
    let avps = group.as_grouped()?;
    find_avp(&avps, avp_code::CC_TIME)
        .map(|a| a.as_unsigned().map(Duration::from_secs))
        .transpose()
}

fn service_unit(code: u32, units: Duration) -> Avp {
    Avp::mandatory(
        code,
        AvpData::Grouped(vec![Avp::mandatory(
            avp_code::CC_TIME,
            AvpData::Unsigned32(u32::try_from(units.as_secs()).unwrap_or(u32::MAX)),
        )]),
    )
}

impl CreditControlRequest {
    /// Decode a CCR, rejecting messages without session id, origin or request type
    pub fn from_message(msg: &DiameterMessage) -> AppResult<Self> {
        if msg.header.command_code != cmd::CREDIT_CONTROL || !msg.header.is_request() {
            return Err(AppError::MalformedMessage(format!(
                "command {} (request: {}) is not a Credit-Control-Request",
                msg.header.command_code,
                msg.header.is_request()
            )));
        }

        let session_id = required(msg, avp_code::SESSION_ID, "Session-Id")?
            .as_str()?
            .to_string();
        let origin_host = required(msg, avp_code::ORIGIN_HOST, "Origin-Host")?
            .as_str()?
            .to_string();
        let origin_realm = required(msg, avp_code::ORIGIN_REALM, "Origin-Realm")?
            .as_str()?
            .to_string();
        let request_type =
            RequestType::try_from(required(msg, avp_code::CC_REQUEST_TYPE, "CC-Request-Type")?.as_u32()?)?;
        if session_id.is_empty() || origin_host.is_empty() || origin_realm.is_empty() {
            return Err(AppError::MalformedMessage(
                "empty Session-Id or Origin identity".to_string(),
            ));
        }

        let request_number = msg
            .find_avp(avp_code::CC_REQUEST_NUMBER)
            .map(Avp::as_u32)
            .transpose()?
            .unwrap_or(0);
        let auth_application_id = msg
            .find_avp(avp_code::AUTH_APPLICATION_ID)
            .map(Avp::as_u32)
            .transpose()?
            .unwrap_or(msg.header.application_id);
        let event_timestamp = msg
            .find_avp(avp_code::EVENT_TIMESTAMP)
            .map(Avp::as_time)
            .transpose()?;
        let service_identifier = msg
            .find_avp(avp_code::SERVICE_IDENTIFIER)
            .map(Avp::as_u32)
            .transpose()?;

        let mut subscription_ids = Vec::new();
        let mut extra_avps = Vec::new();
        for avp in &msg.avps {
            match avp.code() {
                avp_code::SUBSCRIPTION_ID => {
                    let group = avp.as_grouped()?;
                    let id_type = find_avp(&group, avp_code::SUBSCRIPTION_ID_TYPE)
                        .map(Avp::as_u32)
                        .transpose()?
                        .unwrap_or(subscription_id_type::END_USER_E164);
                    let data = find_avp(&group, avp_code::SUBSCRIPTION_ID_DATA)
                        .map(|a| a.as_str().map(str::to_string))
                        .transpose()?
                        .unwrap_or_default();
                    subscription_ids.push(SubscriptionId { id_type, data });
                }
                avp_code::SESSION_ID
                | avp_code::ORIGIN_HOST
                | avp_code::ORIGIN_REALM
                | avp_code::DESTINATION_HOST
                | avp_code::DESTINATION_REALM
                | avp_code::AUTH_APPLICATION_ID
                | avp_code::SERVICE_CONTEXT_ID
                | avp_code::CC_REQUEST_TYPE
                | avp_code::CC_REQUEST_NUMBER
                | avp_code::EVENT_TIMESTAMP
                | avp_code::SERVICE_IDENTIFIER
                | avp_code::REQUESTED_SERVICE_UNIT
                | avp_code::USED_SERVICE_UNIT
                | avp_code::SERVICE_INFORMATION => {}
                _ => extra_avps.push(avp.clone()),
            }
        }

        Ok(Self {
            header: msg.header,
            session_id,
            origin_host,
            origin_realm,
            destination_host: optional_string(msg, avp_code::DESTINATION_HOST)?,
            destination_realm: optional_string(msg, avp_code::DESTINATION_REALM)?,
            auth_application_id,
            service_context_id: optional_string(msg, avp_code::SERVICE_CONTEXT_ID)?,
            request_type,
            request_number,
            event_timestamp,
            subscription_ids,
            service_identifier,
            requested_units: cc_time(msg.find_avp(avp_code::REQUESTED_SERVICE_UNIT))?,
            used_units: cc_time(msg.find_avp(avp_code::USED_SERVICE_UNIT))?,
            service_information: msg.find_avp(avp_code::SERVICE_INFORMATION).cloned(),
            extra_avps,
        })
    }

    /// Encode back to the wire
    pub fn to_message(&self) -> DiameterMessage {
        let mut msg = DiameterMessage {
            header: self.header,
            avps: Vec::new(),
        };
        let text = |s: &str| AvpData::Utf8String(s.to_string());
        let identity = |s: &str| AvpData::DiameterIdentity(s.to_string());

        msg.add_avp(Avp::mandatory(avp_code::SESSION_ID, text(&self.session_id)))
            .add_avp(Avp::mandatory(avp_code::ORIGIN_HOST, identity(&self.origin_host)))
            .add_avp(Avp::mandatory(avp_code::ORIGIN_REALM, identity(&self.origin_realm)));
        if !self.destination_host.is_empty() {
            msg.add_avp(Avp::mandatory(
                avp_code::DESTINATION_HOST,
                identity(&self.destination_host),
            ));
        }
        msg.add_avp(Avp::mandatory(
            avp_code::DESTINATION_REALM,
            identity(&self.destination_realm),
        ))
        .add_avp(Avp::mandatory(
            avp_code::AUTH_APPLICATION_ID,
            AvpData::Unsigned32(self.auth_application_id),
        ))
        .add_avp(Avp::mandatory(
            avp_code::SERVICE_CONTEXT_ID,
            text(&self.service_context_id),
        ))
        .add_avp(Avp::mandatory(
            avp_code::CC_REQUEST_TYPE,
            AvpData::Enumerated(self.request_type.as_u32() as i32),
        ))
        .add_avp(Avp::mandatory(
            avp_code::CC_REQUEST_NUMBER,
            AvpData::Unsigned32(self.request_number),
        ));
        if let Some(ts) = self.event_timestamp {
            msg.add_avp(Avp::mandatory(avp_code::EVENT_TIMESTAMP, AvpData::Time(ts)));
        }
        for sub in &self.subscription_ids {
            msg.add_avp(Avp::mandatory(
                avp_code::SUBSCRIPTION_ID,
                AvpData::Grouped(vec![
                    Avp::mandatory(
                        avp_code::SUBSCRIPTION_ID_TYPE,
                        AvpData::Enumerated(sub.id_type as i32),
                    ),
                    Avp::mandatory(avp_code::SUBSCRIPTION_ID_DATA, text(&sub.data)),
                ]),
            ));
        }
        if let Some(id) = self.service_identifier {
            msg.add_avp(Avp::mandatory(avp_code::SERVICE_IDENTIFIER, AvpData::Unsigned32(id)));
        }
        if let Some(units) = self.requested_units {
            msg.add_avp(service_unit(avp_code::REQUESTED_SERVICE_UNIT, units));
        }
        if let Some(units) = self.used_units {
            msg.add_avp(service_unit(avp_code::USED_SERVICE_UNIT, units));
        }
        if let Some(info) = &self.service_information {
            msg.add_avp(info.clone());
        }
        for avp in &self.extra_avps {
            msg.add_avp(avp.clone());
        }
        msg
    }

    /// Build the request a network element sends for `event`
    ///
    /// Type, number and units follow the request-state machine applied to
    /// the event usage.
    pub fn from_session_event(
        event: &SessionEvent,
        cfg: &DiameterConfig,
        is_terminate: bool,
    ) -> AppResult<Self> {
        let plan = plan_request(
            event.usage().unwrap_or(Duration::ZERO),
            cfg.debit_interval(),
            is_terminate,
        )?;

        let (requested_units, used_units) = match plan.request_type {
            RequestType::Terminate => (None, Some(plan.units)),
            RequestType::Initial | RequestType::Update => (Some(plan.units), None),
        };

        let subscriber = if event.subscriber_id().is_empty() {
            event.account()
        } else {
            event.subscriber_id()
        };
        let subscription_ids = vec![
            SubscriptionId {
                id_type: subscription_id_type::END_USER_E164,
                data: event.account().to_string(),
            },
            SubscriptionId {
                id_type: subscription_id_type::END_USER_IMSI,
                data: subscriber.to_string(),
            },
        ];

        let party = |code: u32, value: &str| {
            Avp::vendor_mandatory(code, vendor::TGPP, AvpData::Utf8String(value.to_string()))
        };
        let in_information = Avp::vendor_mandatory(
            avp_code::IN_INFORMATION,
            vendor::HUAWEI,
            AvpData::Grouped(vec![
                party(avp_code::CALLING_PARTY_ADDRESS, event.account()),
                party(avp_code::CALLED_PARTY_ADDRESS, event.destination()),
                Avp::vendor_mandatory(
                    avp_code::REAL_CALLED_NUMBER,
                    vendor::HUAWEI,
                    AvpData::Utf8String(event.destination().to_string()),
                ),
                Avp::vendor_mandatory(
                    avp_code::CHARGE_FLOW_TYPE,
                    vendor::HUAWEI,
                    AvpData::Unsigned32(0),
                ),
            ]),
        );
        let service_information = Avp::vendor_mandatory(
            avp_code::SERVICE_INFORMATION,
            vendor::TGPP,
            AvpData::Grouped(vec![in_information]),
        );

        let header = DiameterMessage::new_request(cmd::CREDIT_CONTROL, cfg.auth_application_id).header;

        Ok(Self {
            header,
            session_id: event.origin_id().to_string(),
            origin_host: cfg.origin_host.clone(),
            origin_realm: cfg.origin_realm.clone(),
            destination_host: String::new(),
            destination_realm: cfg.origin_realm.clone(),
            auth_application_id: cfg.auth_application_id,
            service_context_id: cfg.service_context_id.clone(),
            request_type: plan.request_type,
            request_number: plan.request_number,
            event_timestamp: Some(event.start_time().unwrap_or_else(Utc::now)),
            subscription_ids,
            service_identifier: Some(0),
            requested_units,
            used_units,
            service_information: Some(service_information),
            extra_avps: Vec::new(),
        })
    }

    /// Units carried by this request: used units on TERMINATE, requested otherwise
    pub fn cc_units(&self) -> Duration {
        let (primary, fallback) = match self.request_type {
            RequestType::Terminate => (self.used_units, self.requested_units),
            RequestType::Initial | RequestType::Update => (self.requested_units, self.used_units),
        };
        primary.or(fallback).unwrap_or(Duration::ZERO)
    }

    /// Usage reported by this request
    pub fn usage(&self, debit_interval: Duration) -> AppResult<Duration> {
        resolve_usage(
            self.request_type,
            self.request_number,
            self.cc_units(),
            debit_interval,
        )
    }

    /// Called-Party-Address from the service information block
    pub fn called_party_address(&self) -> AppResult<Option<String>> {
        let Some(info) = &self.service_information else {
            return Ok(None);
        };
        find_avp_nested(std::slice::from_ref(info), avp_code::CALLED_PARTY_ADDRESS)?
            .map(|a| a.as_str().map(str::to_string))
            .transpose()
    }

    /// Subscription data of the first E.164 subscription id
    pub fn e164_subscriber(&self) -> Option<&str> {
        self.subscription_ids
            .iter()
            .find(|s| s.id_type == subscription_id_type::END_USER_E164)
            .map(|s| s.data.as_str())
    }

    /// Normalized session event for the engine
    pub fn as_session_event(&self, cfg: &DiameterConfig) -> AppResult<SessionEvent> {
        let mut event = SessionEvent::new(self.session_id.clone())
            .with_event_name(CCR_EVENT_NAME)
            .with_origin_host(self.origin_host.clone())
            .with_tenant(cfg.tenant.clone())
            .with_category(cfg.category.clone())
            .with_request_type(cfg.request_type.clone())
            .with_direction(cfg.direction.clone())
            .with_usage(self.usage(cfg.debit_interval())?);

        if let Some(ts) = self.event_timestamp {
            event = event.with_setup_time(ts).with_answer_time(ts);
        }
        if let Some(subscriber) = self.e164_subscriber() {
            event = event
                .with_account(subscriber)
                .with_subject(subscriber)
                .with_subscriber_id(subscriber);
        }
        if let Some(destination) = self.called_party_address()? {
            event = event.with_destination(destination);
        }
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::CREDIT_CONTROL_APPLICATION_ID;
    use chrono::TimeZone;

    fn huawei_ccr() -> DiameterMessage {
        let mut m = DiameterMessage::new_request(cmd::CREDIT_CONTROL, CREDIT_CONTROL_APPLICATION_ID);
        let utf8 = |s: &str| AvpData::Utf8String(s.to_string());
        let ident = |s: &str| AvpData::DiameterIdentity(s.to_string());
        let huawei = |code: u32, s: &str| Avp::vendor_mandatory(code, vendor::HUAWEI, utf8(s));
        let tgpp = |code: u32, s: &str| Avp::vendor_mandatory(code, vendor::TGPP, utf8(s));

        m.add_avp(Avp::mandatory(avp_code::SESSION_ID, utf8("routinga;1442095190;1476802709")))
            .add_avp(Avp::mandatory(avp_code::ORIGIN_HOST, ident("simuhuawei")))
            .add_avp(Avp::mandatory(avp_code::ORIGIN_REALM, ident("routing1.huawei.com")))
            .add_avp(Avp::mandatory(avp_code::DESTINATION_HOST, ident("CGR-DA")))
            .add_avp(Avp::mandatory(avp_code::DESTINATION_REALM, ident("cgrates.org")))
            .add_avp(Avp::mandatory(avp_code::AUTH_APPLICATION_ID, AvpData::Unsigned32(4)))
            .add_avp(Avp::mandatory(avp_code::SERVICE_CONTEXT_ID, utf8("voice@huawei.com")))
            .add_avp(Avp::mandatory(avp_code::CC_REQUEST_TYPE, AvpData::Enumerated(1)))
            .add_avp(Avp::mandatory(avp_code::CC_REQUEST_NUMBER, AvpData::Enumerated(0)))
            .add_avp(Avp::mandatory(
                avp_code::EVENT_TIMESTAMP,
                AvpData::Time(Utc.with_ymd_and_hms(2015, 11, 23, 12, 22, 24).unwrap()),
            ));
        for (id_type, data) in [(0, "4986517174963"), (1, "208708000003")] {
            m.add_avp(Avp::mandatory(
                avp_code::SUBSCRIPTION_ID,
                AvpData::Grouped(vec![
                    Avp::mandatory(avp_code::SUBSCRIPTION_ID_TYPE, AvpData::Enumerated(id_type)),
                    Avp::mandatory(avp_code::SUBSCRIPTION_ID_DATA, utf8(data)),
                ]),
            ));
        }
        m.add_avp(Avp::mandatory(avp_code::SERVICE_IDENTIFIER, AvpData::Unsigned32(0)))
            .add_avp(service_unit(avp_code::REQUESTED_SERVICE_UNIT, Duration::from_secs(300)))
            .add_avp(Avp::vendor_mandatory(
                avp_code::SERVICE_INFORMATION,
                vendor::TGPP,
                AvpData::Grouped(vec![Avp::vendor_mandatory(
                    avp_code::IN_INFORMATION,
                    vendor::HUAWEI,
                    AvpData::Grouped(vec![
                        tgpp(avp_code::CALLING_PARTY_ADDRESS, "4986517174963"),
                        tgpp(avp_code::CALLED_PARTY_ADDRESS, "4986517174964"),
                        huawei(avp_code::REAL_CALLED_NUMBER, "4986517174964"),
                        huawei(avp_code::SSP_TIME, "20091020120101"),
                    ]),
                )]),
            ))
            .add_avp(Avp::optional(99_999, AvpData::OctetString(bytes::Bytes::from_static(b"x"))));
        m
    }

    #[test]
    fn test_decode_huawei_ccr() {
        let msg = DiameterMessage::decode(huawei_ccr().to_bytes()).unwrap();
        let ccr = CreditControlRequest::from_message(&msg).unwrap();

        assert_eq!(ccr.session_id, "routinga;1442095190;1476802709");
        assert_eq!(ccr.request_type, RequestType::Initial);
        assert_eq!(ccr.request_number, 0);
        assert_eq!(ccr.subscription_ids.len(), 2);
        assert_eq!(ccr.requested_units, Some(Duration::from_secs(300)));
        assert_eq!(ccr.extra_avps.len(), 1);
        assert_eq!(
            ccr.called_party_address().unwrap().as_deref(),
            Some("4986517174964")
        );
    }

    #[test]
    fn test_ccr_as_session_event() {
        let ccr = CreditControlRequest::from_message(&huawei_ccr()).unwrap();
        let cfg = DiameterConfig::default();
        let event = ccr.as_session_event(&cfg).unwrap();

        let ts = Utc.with_ymd_and_hms(2015, 11, 23, 12, 22, 24).unwrap();
        assert_eq!(event.event_name(), CCR_EVENT_NAME);
        assert_eq!(event.origin_id(), "routinga;1442095190;1476802709");
        assert_eq!(event.account(), "4986517174963");
        assert_eq!(event.subject(), "4986517174963");
        assert_eq!(event.subscriber_id(), "4986517174963");
        assert_eq!(event.destination(), "4986517174964");
        assert_eq!(event.setup_time(), Some(ts));
        assert_eq!(event.answer_time(), Some(ts));
        assert_eq!(event.usage(), Some(Duration::from_secs(300)));
        assert_eq!(event.tenant(), cfg.tenant);
        assert_eq!(event.direction(), "*out");
    }

    #[test]
    fn test_passthrough_is_byte_exact() {
        let original = huawei_ccr();
        let ccr = CreditControlRequest::from_message(&original).unwrap();
        let reencoded = ccr.to_message();

        assert_eq!(
            reencoded.find_avp(avp_code::SERVICE_INFORMATION),
            original.find_avp(avp_code::SERVICE_INFORMATION)
        );
        assert_eq!(reencoded.find_avp(99_999), original.find_avp(99_999));
        assert_eq!(CreditControlRequest::from_message(&reencoded).unwrap(), ccr);
    }

    #[test]
    fn test_missing_mandatory_avps() {
        for code in [
            avp_code::SESSION_ID,
            avp_code::ORIGIN_HOST,
            avp_code::ORIGIN_REALM,
            avp_code::CC_REQUEST_TYPE,
        ] {
            let mut msg = huawei_ccr();
            msg.avps.retain(|a| a.code() != code);
            let err = CreditControlRequest::from_message(&msg).unwrap_err();
            assert_eq!(err.error_code(), "malformed_message", "AVP {}", code);
        }
    }

    #[test]
    fn test_wrong_shape_rejected() {
        let mut msg = huawei_ccr();
        for avp in msg.avps.iter_mut() {
            if avp.code() == avp_code::CC_REQUEST_TYPE {
                *avp = Avp::mandatory(avp_code::CC_REQUEST_TYPE, AvpData::Utf8String("INITIAL".into()));
            }
        }
        assert!(CreditControlRequest::from_message(&msg).is_err());
    }

    #[test]
    fn test_from_session_event_terminate() {
        let cfg = DiameterConfig::default();
        let event = SessionEvent::new("abc")
            .with_account("1001")
            .with_destination("1002")
            .with_usage(Duration::from_secs(610));

        let ccr = CreditControlRequest::from_session_event(&event, &cfg, true).unwrap();
        assert_eq!(ccr.request_type, RequestType::Terminate);
        assert_eq!(ccr.request_number, 3);
        assert_eq!(ccr.used_units, Some(Duration::from_secs(10)));
        assert_eq!(ccr.requested_units, None);
        assert_eq!(ccr.usage(cfg.debit_interval()).unwrap(), Duration::from_secs(610));

        let decoded = CreditControlRequest::from_message(
            &DiameterMessage::decode(ccr.to_message().to_bytes()).unwrap(),
        )
        .unwrap();
        assert_eq!(decoded.e164_subscriber(), Some("1001"));
        assert_eq!(decoded.called_party_address().unwrap().as_deref(), Some("1002"));
        assert_eq!(decoded.used_units, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_from_session_event_initial() {
        let cfg = DiameterConfig::default();
        let event = SessionEvent::new("abc").with_account("1001").with_destination("1002");
        let ccr = CreditControlRequest::from_session_event(&event, &cfg, false).unwrap();
        assert_eq!(ccr.request_type, RequestType::Initial);
        assert_eq!(ccr.requested_units, Some(cfg.debit_interval()));
        assert_eq!(ccr.subscription_ids.len(), 2);
    }
}
