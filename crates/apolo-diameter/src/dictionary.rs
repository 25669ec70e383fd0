//! Codes used by the Credit-Control application
//!
//! Base protocol codes come from RFC 6733, credit control codes from
//! RFC 4006 and the service information block from 3GPP TS 32.299 plus the
//! Huawei IN-Information extension network elements send us.

/// Diameter Credit-Control application id
pub const CREDIT_CONTROL_APPLICATION_ID: u32 = 4;

/// Protocol version carried in every header
pub const DIAMETER_VERSION: u8 = 1;

/// Command codes
pub mod cmd {
    /// Credit-Control-Request/Answer
    pub const CREDIT_CONTROL: u32 = 272;
}

/// Vendor ids
pub mod vendor {
    pub const TGPP: u32 = 10415;
    pub const HUAWEI: u32 = 2011;
}

/// AVP codes
pub mod avp_code {
    // Base protocol
    pub const SESSION_ID: u32 = 263;
    pub const ORIGIN_HOST: u32 = 264;
    pub const ORIGIN_REALM: u32 = 296;
    pub const DESTINATION_HOST: u32 = 293;
    pub const DESTINATION_REALM: u32 = 283;
    pub const AUTH_APPLICATION_ID: u32 = 258;
    pub const RESULT_CODE: u32 = 268;
    pub const VENDOR_ID: u32 = 266;
    pub const PRODUCT_NAME: u32 = 269;
    pub const ORIGIN_STATE_ID: u32 = 278;
    pub const EVENT_TIMESTAMP: u32 = 55;
    pub const USER_NAME: u32 = 1;

    // Credit control
    pub const CC_REQUEST_NUMBER: u32 = 415;
    pub const CC_REQUEST_TYPE: u32 = 416;
    pub const CC_TIME: u32 = 420;
    pub const GRANTED_SERVICE_UNIT: u32 = 431;
    pub const REQUESTED_SERVICE_UNIT: u32 = 437;
    pub const USED_SERVICE_UNIT: u32 = 446;
    pub const SERVICE_IDENTIFIER: u32 = 439;
    pub const SERVICE_CONTEXT_ID: u32 = 461;
    pub const SUBSCRIPTION_ID: u32 = 443;
    pub const SUBSCRIPTION_ID_DATA: u32 = 444;
    pub const SUBSCRIPTION_ID_TYPE: u32 = 450;
    pub const REQUESTED_ACTION: u32 = 436;
    pub const MULTIPLE_SERVICES_INDICATOR: u32 = 455;

    // 3GPP service information
    pub const SERVICE_INFORMATION: u32 = 873;

    // Huawei IN-Information
    pub const IN_INFORMATION: u32 = 20300;
    pub const CALLING_PARTY_ADDRESS: u32 = 831;
    pub const CALLED_PARTY_ADDRESS: u32 = 832;
    pub const REAL_CALLED_NUMBER: u32 = 20327;
    pub const CHARGE_FLOW_TYPE: u32 = 20339;
    pub const CALLING_VLR_NUMBER: u32 = 20302;
    pub const CALLING_CELLID_OR_SAI: u32 = 20303;
    pub const BEARER_CAPABILITY: u32 = 20313;
    pub const CALL_REFERENCE_NUMBER: u32 = 20321;
    pub const MSC_ADDRESS: u32 = 20322;
    pub const TIME_ZONE: u32 = 20324;
    pub const CALLED_PARTY_NP: u32 = 20385;
    pub const SSP_TIME: u32 = 20386;
}

/// Result-Code values
pub mod result_code {
    pub const SUCCESS: u32 = 2001;
    pub const TOO_BUSY: u32 = 3004;
    pub const CREDIT_LIMIT_REACHED: u32 = 4012;
    pub const INVALID_AVP_VALUE: u32 = 5004;
    pub const MISSING_AVP: u32 = 5005;
    pub const UNABLE_TO_COMPLY: u32 = 5012;
}

/// Subscription-Id-Type values
pub mod subscription_id_type {
    pub const END_USER_E164: u32 = 0;
    pub const END_USER_IMSI: u32 = 1;
    pub const END_USER_SIP_URI: u32 = 2;
    pub const END_USER_NAI: u32 = 3;
    pub const END_USER_PRIVATE: u32 = 4;
}

/// Grouped AVPs whose payload is itself a list of AVPs
pub fn is_grouped(code: u32) -> bool {
    matches!(
        code,
        avp_code::SUBSCRIPTION_ID
            | avp_code::REQUESTED_SERVICE_UNIT
            | avp_code::USED_SERVICE_UNIT
            | avp_code::GRANTED_SERVICE_UNIT
            | avp_code::SERVICE_INFORMATION
            | avp_code::IN_INFORMATION
    )
}
