//! Keys and certificates shared by unit tests.

use crate::signatures::SigningCredentials;
use der::asn1::{BitString, UtcTime};
use der::{Any, Decode, Encode};
use rsa::pkcs8::EncodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use x509_cert::certificate::{Certificate, TbsCertificate, Version};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::time::{Time, Validity};

const DAY: u64 = 86_400;

pub fn key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("RSA key generation"))
}

/// Self-signed certificate valid from a year ago until a year from now.
pub fn certificate() -> &'static [u8] {
    static CERT: OnceLock<Vec<u8>> = OnceLock::new();
    CERT.get_or_init(|| {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).expect("clock").as_secs();
        certificate_valid_between(now - 365 * DAY, now + 365 * DAY)
    })
}

/// Self-signed certificate for [`key`] with the given validity (Unix seconds).
pub fn certificate_valid_between(not_before: u64, not_after: u64) -> Vec<u8> {
    let name = Name::from_str("CN=Test Signer,O=Example,C=ES").expect("name");
    let algorithm = AlgorithmIdentifierOwned {
        oid: "1.2.840.113549.1.1.11".parse().expect("oid"),
        parameters: Some(Any::null()),
    };
    let spki_der = key().to_public_key().to_public_key_der().expect("spki");
    let time = |secs: u64| Time::UtcTime(UtcTime::from_unix_duration(Duration::from_secs(secs)).expect("utc time"));
    let tbs = TbsCertificate {
        version: Version::V3,
        serial_number: SerialNumber::new(&[0x01, 0x23]).expect("serial"),
        signature: algorithm.clone(),
        issuer: name.clone(),
        validity: Validity {
            not_before: time(not_before),
            not_after: time(not_after),
        },
        subject: name,
        subject_public_key_info: SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes()).expect("spki"),
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: None,
    };
    let digest = Sha256::digest(tbs.to_der().expect("tbs"));
    let signature = key().sign(Pkcs1v15Sign::new::<Sha256>(), &digest).expect("sign");
    Certificate {
        tbs_certificate: tbs,
        signature_algorithm: algorithm,
        signature: BitString::from_bytes(&signature).expect("bits"),
    }
    .to_der()
    .expect("certificate")
}

pub fn credentials() -> SigningCredentials {
    SigningCredentials::new(key().clone(), vec![certificate().to_vec()])
}
