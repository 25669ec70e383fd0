//! Credit-Control-Answer

use apolo_core::config::DiameterConfig;
use apolo_core::{AppError, AppResult};
use std::time::Duration;

use crate::avp::{find_avp, Avp, AvpData};
use crate::ccr::CreditControlRequest;
use crate::dictionary::{avp_code, cmd, result_code};
use crate::message::{DiameterHeader, DiameterMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditControlAnswer {
    /// Header of the request being answered
    pub request_header: DiameterHeader,
    pub session_id: String,
    pub origin_host: String,
    pub origin_realm: String,
    pub auth_application_id: u32,
    pub request_type: u32,
    pub request_number: u32,
    pub result_code: u32,
    /// Granted-Service-Unit CC-Time
    pub granted_units: Option<Duration>,
}

impl CreditControlAnswer {
    /// Answer to `ccr` with the given result code
    pub fn new(ccr: &CreditControlRequest, cfg: &DiameterConfig, result_code: u32) -> Self {
        Self {
            request_header: ccr.header,
            session_id: ccr.session_id.clone(),
            origin_host: cfg.origin_host.clone(),
            origin_realm: cfg.origin_realm.clone(),
            auth_application_id: ccr.auth_application_id,
            request_type: ccr.request_type.as_u32(),
            request_number: ccr.request_number,
            result_code,
            granted_units: None,
        }
    }

    /// Successful answer granting `units`
    pub fn granted(ccr: &CreditControlRequest, cfg: &DiameterConfig, units: Duration) -> Self {
        Self {
            granted_units: Some(units),
            ..Self::new(ccr, cfg, result_code::SUCCESS)
        }
    }

    /// Failure answer for a decoded request
    pub fn from_error(ccr: &CreditControlRequest, cfg: &DiameterConfig, err: &AppError) -> Self {
        Self::new(ccr, cfg, Self::result_code_for(err))
    }

    /// Failure answer for a message that could not be decoded as a CCR
    ///
    /// Whatever identifiers can be read are echoed back.
    pub fn for_undecodable(msg: &DiameterMessage, cfg: &DiameterConfig, err: &AppError) -> Self {
        let read_u32 = |code| find_avp(&msg.avps, code).and_then(|a| a.as_u32().ok());
        Self {
            request_header: msg.header,
            session_id: find_avp(&msg.avps, avp_code::SESSION_ID)
                .and_then(|a| a.as_str().ok())
                .unwrap_or_default()
                .to_string(),
            origin_host: cfg.origin_host.clone(),
            origin_realm: cfg.origin_realm.clone(),
            auth_application_id: read_u32(avp_code::AUTH_APPLICATION_ID)
                .unwrap_or(cfg.auth_application_id),
            request_type: read_u32(avp_code::CC_REQUEST_TYPE).unwrap_or(0),
            request_number: read_u32(avp_code::CC_REQUEST_NUMBER).unwrap_or(0),
            result_code: Self::result_code_for(err),
            granted_units: None,
        }
    }

    /// Result-Code reported for an engine error
    pub fn result_code_for(err: &AppError) -> u32 {
        match err {
            AppError::LockTimeout { .. } => result_code::TOO_BUSY,
            AppError::InsufficientCredit(_) | AppError::RatingUnavailable(_) => {
                result_code::CREDIT_LIMIT_REACHED
            }
            AppError::InvalidRequestSequence(_) => result_code::INVALID_AVP_VALUE,
            AppError::MalformedMessage(_) => result_code::MISSING_AVP,
            _ => result_code::UNABLE_TO_COMPLY,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result_code == result_code::SUCCESS
    }

    pub fn to_message(&self) -> DiameterMessage {
        let mut msg = DiameterMessage::new_answer(&self.request_header);
        msg.add_avp(Avp::mandatory(
            avp_code::SESSION_ID,
            AvpData::Utf8String(self.session_id.clone()),
        ))
        .add_avp(Avp::mandatory(
            avp_code::RESULT_CODE,
            AvpData::Unsigned32(self.result_code),
        ))
        .add_avp(Avp::mandatory(
            avp_code::ORIGIN_HOST,
            AvpData::DiameterIdentity(self.origin_host.clone()),
        ))
        .add_avp(Avp::mandatory(
            avp_code::ORIGIN_REALM,
            AvpData::DiameterIdentity(self.origin_realm.clone()),
        ))
        .add_avp(Avp::mandatory(
            avp_code::AUTH_APPLICATION_ID,
            AvpData::Unsigned32(self.auth_application_id),
        ))
        .add_avp(Avp::mandatory(
            avp_code::CC_REQUEST_TYPE,
            AvpData::Enumerated(self.request_type as i32),
        ))
        .add_avp(Avp::mandatory(
            avp_code::CC_REQUEST_NUMBER,
            AvpData::Unsigned32(self.request_number),
        ));
        if let Some(units) = self.granted_units {
            msg.add_avp(Avp::mandatory(
                avp_code::GRANTED_SERVICE_UNIT,
                AvpData::Grouped(vec![Avp::mandatory(
                    avp_code::CC_TIME,
                    AvpData::Unsigned32(u32::try_from(units.as_secs()).unwrap_or(u32::MAX)),
                )]),
            ));
        }
        msg
    }

    pub fn from_message(msg: &DiameterMessage) -> AppResult<Self> {
        if msg.header.command_code != cmd::CREDIT_CONTROL || msg.header.is_request() {
            return Err(AppError::MalformedMessage(
                "not a Credit-Control-Answer".to_string(),
            ));
        }
        let text = |code: u32| -> AppResult<String> {
            Ok(msg
                .find_avp(code)
                .map(|a| a.as_str().map(str::to_string))
                .transpose()?
                .unwrap_or_default())
        };
        let number = |code: u32| -> AppResult<Option<u32>> {
            msg.find_avp(code).map(Avp::as_u32).transpose()
        };

        let result_code = number(avp_code::RESULT_CODE)?
            .ok_or_else(|| AppError::MalformedMessage("missing mandatory AVP Result-Code".to_string()))?;
        let granted_units = match msg.find_avp(avp_code::GRANTED_SERVICE_UNIT) {
            Some(gsu) => find_avp(&gsu.as_grouped()?, avp_code::CC_TIME)
                .map(|a| a.as_unsigned().map(Duration::from_secs))
                .transpose()?,
            None => None,
        };

        Ok(Self {
            request_header: msg.header,
            session_id: text(avp_code::SESSION_ID)?,
            origin_host: text(avp_code::ORIGIN_HOST)?,
            origin_realm: text(avp_code::ORIGIN_REALM)?,
            auth_application_id: number(avp_code::AUTH_APPLICATION_ID)?.unwrap_or(msg.header.application_id),
            request_type: number(avp_code::CC_REQUEST_TYPE)?.unwrap_or(0),
            request_number: number(avp_code::CC_REQUEST_NUMBER)?.unwrap_or(0),
            result_code,
            granted_units,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apolo_core::models::SessionEvent;

    fn ccr() -> CreditControlRequest {
        let event = SessionEvent::new("abc")
            .with_account("1001")
            .with_destination("1002");
        CreditControlRequest::from_session_event(&event, &DiameterConfig::default(), false).unwrap()
    }

    #[test]
    fn test_granted_answer_over_the_wire() {
        let cfg = DiameterConfig::default();
        let request = ccr();
        let answer = CreditControlAnswer::granted(&request, &cfg, Duration::from_secs(300));

        let wire = answer.to_message().to_bytes();
        let msg = DiameterMessage::decode(wire).unwrap();
        assert!(!msg.header.is_request());
        assert_eq!(msg.header.hop_by_hop_id, request.header.hop_by_hop_id);

        let decoded = CreditControlAnswer::from_message(&msg).unwrap();
        assert!(decoded.is_success());
        assert_eq!(decoded.session_id, "abc");
        assert_eq!(decoded.granted_units, Some(Duration::from_secs(300)));
        assert_eq!(decoded.request_type, 1);
    }

    #[test]
    fn test_result_codes() {
        let code = CreditControlAnswer::result_code_for;
        assert_eq!(
            code(&AppError::LockTimeout {
                key: "abc".to_string(),
                timeout_ms: 3000
            }),
            result_code::TOO_BUSY
        );
        assert_eq!(
            code(&AppError::InsufficientCredit("1001".to_string())),
            result_code::CREDIT_LIMIT_REACHED
        );
        assert_eq!(
            code(&AppError::RatingUnavailable("down".to_string())),
            result_code::CREDIT_LIMIT_REACHED
        );
        assert_eq!(
            code(&AppError::InvalidRequestSequence("x".to_string())),
            result_code::INVALID_AVP_VALUE
        );
        assert_eq!(
            code(&AppError::MalformedMessage("x".to_string())),
            result_code::MISSING_AVP
        );
        assert_eq!(
            code(&AppError::OutOfOrderRequest {
                session_id: "abc".to_string(),
                last: 1,
                received: 1
            }),
            result_code::UNABLE_TO_COMPLY
        );
    }

    #[test]
    fn test_answer_for_undecodable() {
        let mut msg = ccr().to_message();
        msg.avps.retain(|a| a.code() != avp_code::ORIGIN_HOST);
        let err = CreditControlRequest::from_message(&msg).unwrap_err();

        let answer = CreditControlAnswer::for_undecodable(&msg, &DiameterConfig::default(), &err);
        assert_eq!(answer.session_id, "abc");
        assert_eq!(answer.result_code, result_code::MISSING_AVP);
    }
}
