//! RFC 3161 time-stamp client.
//!
//! A token is requested over the SignerInfo signature value and attached to
//! the envelope as the `id-aa-timeStampToken` unsigned attribute.

use super::cms::{SignedDataEnvelope, OID_TIMESTAMP_TOKEN};
use super::params::{TsaConfig, TsaExtension};
use super::traits::RequestsTimestamp;
use super::types::DigestAlgorithm;
use crate::error::{Error, Result};
use cms::content_info::ContentInfo;
use cms::signed_data::SignedData;
use der::asn1::{BitString, OctetString, Uint};
use der::oid::ObjectIdentifier;
use der::{Any, Decode, DecodeValue, Encode, FixedTag, Header, Reader, Sequence, Tag};
use std::time::Duration;
use x509_cert::ext::Extension;
use x509_cert::spki::AlgorithmIdentifierOwned;

pub const TIMESTAMP_QUERY_CONTENT_TYPE: &str = "application/timestamp-query";

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct MessageImprint {
    pub hash_algorithm: AlgorithmIdentifierOwned,
    pub hashed_message: OctetString,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct TimeStampReq {
    version: u8,
    message_imprint: MessageImprint,
    req_policy: Option<ObjectIdentifier>,
    nonce: Option<Uint>,
    cert_req: Option<bool>,
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
    extensions: Option<Vec<Extension>>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct PkiStatusInfo {
    status: u32,
    status_string: Option<Vec<String>>,
    fail_info: Option<BitString>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct TimeStampResp {
    status: PkiStatusInfo,
    time_stamp_token: Option<ContentInfo>,
}

/// Leading TSTInfo fields; the optional tail is skipped.
#[derive(Clone, Debug, PartialEq)]
struct TstInfoHead {
    policy: ObjectIdentifier,
    message_imprint: MessageImprint,
    serial_number: Uint,
    gen_time: String,
}

impl FixedTag for TstInfoHead {
    const TAG: Tag = Tag::Sequence;
}

impl<'a> DecodeValue<'a> for TstInfoHead {
    fn decode_value<R: Reader<'a>>(reader: &mut R, header: Header) -> der::Result<Self> {
        reader.read_nested(header.length, |reader| {
            let _version: u8 = reader.decode()?;
            let policy = reader.decode()?;
            let message_imprint = reader.decode()?;
            let serial_number = reader.decode()?;
            let gen_time: Any = reader.decode()?;
            let rest = reader.remaining_len();
            reader.read_slice(rest)?;
            Ok(Self {
                policy,
                message_imprint,
                serial_number,
                gen_time: String::from_utf8_lossy(gen_time.value()).into_owned(),
            })
        })
    }
}

/// A TimeStampReq before encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampRequest {
    pub digest_algorithm: DigestAlgorithm,
    /// Hash of the data being stamped
    pub digest: Vec<u8>,
    pub policy: Option<String>,
    pub cert_req: bool,
    pub nonce: Vec<u8>,
    pub extension: Option<TsaExtension>,
}

impl TimestampRequest {
    /// Request over `data` with a random nonce.
    pub fn new(data: &[u8], config: &TsaConfig) -> Self {
        Self {
            digest_algorithm: config.hash_algorithm,
            digest: config.hash_algorithm.digest(data),
            policy: Some(config.policy.clone()),
            cert_req: config.require_cert,
            nonce: uuid::Uuid::new_v4().as_bytes().to_vec(),
            extension: config.extension.clone(),
        }
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        let req_policy = match &self.policy {
            Some(policy) => Some(
                policy
                    .parse::<ObjectIdentifier>()
                    .map_err(|_| Error::parameter("tsaPolicy", format!("'{}' is not an OID", policy)))?,
            ),
            None => None,
        };
        let extensions = match &self.extension {
            Some(ext) => Some(vec![Extension {
                extn_id: ext
                    .oid
                    .parse()
                    .map_err(|_| Error::parameter("tsaExtensionOid", format!("'{}' is not an OID", ext.oid)))?,
                critical: ext.critical,
                extn_value: OctetString::new(ext.value.clone())?,
            }]),
            None => None,
        };
        let req = TimeStampReq {
            version: 1,
            message_imprint: MessageImprint {
                hash_algorithm: AlgorithmIdentifierOwned {
                    oid: self.digest_algorithm.oid(),
                    parameters: Some(Any::null()),
                },
                hashed_message: OctetString::new(self.digest.clone())?,
            },
            req_policy,
            nonce: Some(Uint::new(&self.nonce)?),
            cert_req: self.cert_req.then_some(true),
            extensions,
        };
        Ok(req.to_der()?)
    }
}

/// DER `ContentInfo` returned by a TSA, with the fields checked on receipt.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampToken {
    der: Vec<u8>,
    pub policy: String,
    /// Serial number as uppercase hex
    pub serial: String,
    /// `genTime` as written by the TSA
    pub gen_time: String,
}

impl TimestampToken {
    /// Parse a token and check it stamps `digest` with `alg`.
    pub fn from_der(der: &[u8], alg: DigestAlgorithm, digest: &[u8]) -> Result<Self> {
        let content_info = ContentInfo::from_der(der)?;
        let signed_data: SignedData = content_info.content.decode_as()?;
        let econtent = signed_data
            .encap_content_info
            .econtent
            .ok_or_else(|| Error::TimestampUnavailable("token carries no TSTInfo".to_string()))?;
        let octets: OctetString = econtent.decode_as()?;
        let info = TstInfoHead::from_der(octets.as_bytes())?;

        let imprint = &info.message_imprint;
        if DigestAlgorithm::from_oid(&imprint.hash_algorithm.oid) != Some(alg) || imprint.hashed_message.as_bytes() != digest
        {
            return Err(Error::TimestampUnavailable(
                "token message imprint does not match the request".to_string(),
            ));
        }
        Ok(Self {
            der: der.to_vec(),
            policy: info.policy.to_string(),
            serial: info.serial_number.as_bytes().iter().map(|b| format!("{:02X}", b)).collect(),
            gen_time: info.gen_time,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.der
    }
}

/// Check a DER TimeStampResp against its request.
pub fn parse_response(response: &[u8], request: &TimestampRequest) -> Result<TimestampToken> {
    let resp = TimeStampResp::from_der(response)
        .map_err(|e| Error::TimestampUnavailable(format!("malformed TimeStampResp: {}", e)))?;
    // 0 granted, 1 granted with modifications
    if resp.status.status > 1 {
        let text = resp.status.status_string.unwrap_or_default().join("; ");
        return Err(Error::TimestampUnavailable(format!(
            "TSA refused the request with status {}: {}",
            resp.status.status, text
        )));
    }
    let token = resp
        .time_stamp_token
        .ok_or_else(|| Error::TimestampUnavailable("TSA response carries no token".to_string()))?;
    TimestampToken::from_der(&token.to_der()?, request.digest_algorithm, &request.digest)
}

/// TSA reached over HTTP POST.
#[derive(Debug, Clone)]
pub struct HttpTsaClient {
    url: String,
    user: Option<String>,
    password: Option<String>,
    timeout: Duration,
}

impl HttpTsaClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: None,
            password: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &TsaConfig) -> Self {
        Self {
            url: config.url.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl RequestsTimestamp for HttpTsaClient {
    fn request_token(&self, request: &TimestampRequest) -> Result<TimestampToken> {
        let body = request.to_der()?;
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::TimestampUnavailable(format!("cannot build HTTP client: {}", e)))?;
        let mut http = client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, TIMESTAMP_QUERY_CONTENT_TYPE)
            .body(body);
        if let Some(user) = &self.user {
            http = http.basic_auth(user, self.password.as_ref());
        }
        log::debug!("Requesting timestamp from {}", self.url);
        let response = http
            .send()
            .map_err(|e| Error::TimestampUnavailable(format!("{}: {}", self.url, e)))?;
        if !response.status().is_success() {
            return Err(Error::TimestampUnavailable(format!(
                "{} answered HTTP {}",
                self.url,
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .map_err(|e| Error::TimestampUnavailable(format!("{}: {}", self.url, e)))?;
        parse_response(&bytes, request)
    }
}

/// Stamp the envelope's signature value.
///
/// When `config.required` is false a failed request is logged and the
/// unstamped envelope is returned.
pub fn attach_timestamp(
    envelope: &SignedDataEnvelope,
    config: &TsaConfig,
    tsa: &dyn RequestsTimestamp,
) -> Result<SignedDataEnvelope> {
    let request = TimestampRequest::new(envelope.signature_value()?, config);
    let token = match tsa.request_token(&request) {
        Ok(token) => token,
        Err(e) if !config.required => {
            log::error!("Timestamp from {} failed, continuing without it: {}", config.url, e);
            return Ok(envelope.clone());
        },
        Err(e) => return Err(e),
    };
    log::info!("Signature timestamped by {} at {}", config.url, token.gen_time);
    envelope.with_unsigned_attribute(OID_TIMESTAMP_TOKEN, Any::from_der(token.as_bytes())?)
}
