//! Fixtures shared by the integration tests: small PDFs, an RSA key and
//! self-signed certificates for it.

#![allow(dead_code)]

use der::asn1::{BitString, UtcTime};
use der::{Any, Decode, Encode};
use pades_triphase::encryption::{Algorithm, SecurityHandler};
use pades_triphase::object::{Object, ObjectRef};
use pades_triphase::signatures::SigningCredentials;
use pades_triphase::writer::ObjectSerializer;
use pades_triphase::PdfDocument;
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

pub const DAY: u64 = 86_400;
const FILE_ID: &str = "/ID [<A0B1C2D3E4F5061728394A5B6C7D8E9F> <A0B1C2D3E4F5061728394A5B6C7D8E9F>]";

pub fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

pub fn key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
}

/// Self-signed certificate for [`key`] valid between two Unix times.
pub fn certificate_valid_between(not_before: u64, not_after: u64) -> Vec<u8> {
    let name = Name::from_str("CN=Integration Signer,O=Example,C=ES").unwrap();
    let algorithm = AlgorithmIdentifierOwned {
        oid: "1.2.840.113549.1.1.11".parse().unwrap(),
        parameters: Some(Any::null()),
    };
    let spki = key().to_public_key().to_public_key_der().unwrap();
    let time = |secs: u64| Time::UtcTime(UtcTime::from_unix_duration(Duration::from_secs(secs)).unwrap());
    let tbs = TbsCertificate {
        version: Version::V3,
        serial_number: SerialNumber::new(&[0x42]).unwrap(),
        signature: algorithm.clone(),
        issuer: name.clone(),
        validity: Validity {
            not_before: time(not_before),
            not_after: time(not_after),
        },
        subject: name,
        subject_public_key_info: SubjectPublicKeyInfoOwned::from_der(spki.as_bytes()).unwrap(),
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: None,
    };
    let digest = Sha256::digest(tbs.to_der().unwrap());
    let signature = key().sign(Pkcs1v15Sign::new::<Sha256>(), &digest).unwrap();
    Certificate {
        tbs_certificate: tbs,
        signature_algorithm: algorithm,
        signature: BitString::from_bytes(&signature).unwrap(),
    }
    .to_der()
    .unwrap()
}

pub fn certificate() -> Vec<u8> {
    static CERT: OnceLock<Vec<u8>> = OnceLock::new();
    CERT.get_or_init(|| certificate_valid_between(now() - 30 * DAY, now() + 30 * DAY))
        .clone()
}

pub fn credentials() -> SigningCredentials {
    SigningCredentials::new(key().clone(), vec![certificate()])
}

fn assemble(objects: &[(u32, Vec<u8>)], trailer_extra: &str) -> Vec<u8> {
    let mut out = b"%PDF-1.6\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets = std::collections::BTreeMap::new();
    for (id, body) in objects {
        offsets.insert(*id, out.len());
        out.extend_from_slice(format!("{} 0 obj\n", id).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    }
    let size = offsets.keys().max().copied().unwrap_or(0) + 1;
    let xref = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", size).as_bytes());
    for id in 1..size {
        match offsets.get(&id) {
            Some(offset) => out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes()),
            None => out.extend_from_slice(b"0000000000 65535 f \n"),
        }
    }
    out.extend_from_slice(
        format!("trailer\n<< /Size {} /Root 1 0 R {} >>\nstartxref\n{}\n%%EOF\n", size, trailer_extra, xref).as_bytes(),
    );
    out
}

/// Pages start at object 20; with `form`, object 3 is a text field
/// "comment" on the first page. Object 5 is the content stream of every page.
pub fn pdf(pages: usize, form: bool) -> Vec<u8> {
    let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", 20 + i)).collect();
    let catalog = if form {
        "<< /Type /Catalog /Pages 2 0 R /AcroForm << /Fields [3 0 R] >> >>"
    } else {
        "<< /Type /Catalog /Pages 2 0 R >>"
    };
    let mut objects: Vec<(u32, Vec<u8>)> = vec![
        (1, catalog.as_bytes().to_vec()),
        (2, format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), pages).into_bytes()),
        (4, b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_vec()),
        (5, b"<< /Length 36 >>\nstream\nBT /F1 12 Tf 72 720 Td (Total) Tj ET\nendstream".to_vec()),
    ];
    if form {
        objects.push((
            3,
            b"<< /FT /Tx /T (comment) /V (approved) /Type /Annot /Subtype /Widget /Rect [50 50 250 70] /P 20 0 R >>"
                .to_vec(),
        ));
    }
    for i in 0..pages {
        let annots = if form && i == 0 { " /Annots [3 0 R]" } else { "" };
        objects.push((
            20 + i as u32,
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 5 0 R \
                 /Resources << /Font << /F1 4 0 R >> >>{} >>",
                annots
            )
            .into_bytes(),
        ));
    }
    objects.sort_by_key(|(id, _)| *id);
    assemble(&objects, FILE_ID)
}

/// [`pdf`] encrypted with `algorithm`.
pub fn encrypted_pdf(pages: usize, algorithm: Algorithm, user: &str, owner: &str) -> Vec<u8> {
    let plain = PdfDocument::open(pdf(pages, true)).unwrap();
    let file_id = plain.file_id().unwrap();
    let (handler, encrypt) =
        SecurityHandler::create(algorithm, user.as_bytes(), owner.as_bytes(), -4, &file_id).unwrap();
    let serializer = ObjectSerializer::new();
    let encrypt_id = plain.max_object_id() + 1;
    let mut objects: Vec<(u32, Vec<u8>)> = plain
        .object_ids()
        .into_iter()
        .map(|id| {
            let r = ObjectRef::new(id, 0);
            let object = handler.encrypt_object(r, plain.get(r).unwrap().clone()).unwrap();
            (id, serializer.serialize(&object))
        })
        .collect();
    objects.push((encrypt_id, serializer.serialize(&Object::Dictionary(encrypt))));
    objects.sort_by_key(|(id, _)| *id);
    assemble(&objects, &format!("/Encrypt {} 0 R {}", encrypt_id, FILE_ID))
}
