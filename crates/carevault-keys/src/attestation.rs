//! WebAuthn attestation object parsing.
//!
//! A hardware authenticator answers credential creation with a CBOR
//! attestation object:
//!
//! ```text
//! { "fmt": text, "attStmt": map, "authData": bytes }
//! ```
//!
//! `authData` is a packed binary structure:
//!
//! ```text
//! rpIdHash (32) | flags (1) | signCount (4, BE)
//!   | aaguid (16) | credIdLen (2, BE) | credId | COSE_Key | [extensions]
//! ```
//!
//! Only Ed25519 credential keys (COSE OKP, alg -8, crv 6) are accepted.
//! Supported statement formats are `none` and `packed` self attestation.

use ciborium::value::{Integer, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use carevault_core::{Ed25519PublicKey, Ed25519Signature};

/// User present.
pub const FLAG_UP: u8 = 0x01;
/// User verified.
pub const FLAG_UV: u8 = 0x04;
/// Attested credential data included.
pub const FLAG_AT: u8 = 0x40;
/// Extension data included.
pub const FLAG_ED: u8 = 0x80;

const RP_ID_HASH_LEN: usize = 32;
const AAGUID_LEN: usize = 16;
const FIXED_HEADER_LEN: usize = RP_ID_HASH_LEN + 1 + 4;

// COSE_Key labels and values (RFC 9053).
const COSE_KTY: i128 = 1;
const COSE_ALG: i128 = 3;
const COSE_CRV: i128 = -1;
const COSE_X: i128 = -2;
const COSE_KTY_OKP: i128 = 1;
const COSE_ALG_EDDSA: i128 = -8;
const COSE_CRV_ED25519: i128 = 6;

/// Reasons an attestation object is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttestationError {
    #[error("malformed attestation: {0}")]
    Malformed(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("rpIdHash does not match relying party")]
    RpIdMismatch,

    #[error("user presence flag not set")]
    UserNotPresent,

    #[error("no attested credential data")]
    NoAttestedCredential,

    #[error("unsupported credential key: {0}")]
    UnsupportedKey(String),

    #[error("unsupported attestation format: {0}")]
    UnsupportedFormat(String),

    #[error("attestation signature invalid")]
    BadSignature,
}

type Result<T> = std::result::Result<T, AttestationError>;

/// Credential data attested by the authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredential {
    pub aaguid: [u8; AAGUID_LEN],
    pub credential_id: Vec<u8>,
    pub public_key: Ed25519PublicKey,
}

/// Decoded `authData`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; RP_ID_HASH_LEN],
    pub flags: u8,
    pub sign_count: u32,
    pub attested: Option<AttestedCredential>,
}

impl AuthenticatorData {
    pub fn user_present(&self) -> bool {
        self.flags & FLAG_UP != 0
    }

    pub fn user_verified(&self) -> bool {
        self.flags & FLAG_UV != 0
    }
}

/// Decoded `attStmt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationStatement {
    /// `fmt = "none"`: no statement.
    None,
    /// `fmt = "packed"` without `x5c`: signed by the credential key itself.
    PackedSelf { signature: Ed25519Signature },
}

impl AttestationStatement {
    fn format(&self) -> &'static str {
        match self {
            AttestationStatement::None => "none",
            AttestationStatement::PackedSelf { .. } => "packed",
        }
    }
}

/// A fully decoded attestation object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationObject {
    pub statement: AttestationStatement,
    pub auth_data: AuthenticatorData,
    /// Raw `authData` bytes, needed to check the statement signature.
    pub auth_data_bytes: Vec<u8>,
}

/// SHA-256 of a relying party id, as carried in `authData`.
pub fn rp_id_hash(rp_id: &str) -> [u8; RP_ID_HASH_LEN] {
    Sha256::digest(rp_id.as_bytes()).into()
}

/// Parse and check an attestation object for credential creation.
///
/// Checks the rpIdHash, requires the UP and AT flags, and verifies the
/// statement over `authData ‖ clientDataHash`.
pub fn verify_attestation(
    bytes: &[u8],
    rp_id: &str,
    client_data_hash: &[u8; 32],
) -> Result<AttestedCredential> {
    let object = parse_attestation_object(bytes)?;
    let auth_data = &object.auth_data;

    if auth_data.rp_id_hash != rp_id_hash(rp_id) {
        return Err(AttestationError::RpIdMismatch);
    }
    if !auth_data.user_present() {
        return Err(AttestationError::UserNotPresent);
    }
    let credential = auth_data
        .attested
        .clone()
        .ok_or(AttestationError::NoAttestedCredential)?;

    match &object.statement {
        AttestationStatement::None => {}
        AttestationStatement::PackedSelf { signature } => {
            let mut signed = object.auth_data_bytes.clone();
            signed.extend_from_slice(client_data_hash);
            credential
                .public_key
                .verify(&signed, signature)
                .map_err(|_| AttestationError::BadSignature)?;
        }
    }

    Ok(credential)
}

/// Decode an attestation object without policy checks.
pub fn parse_attestation_object(bytes: &[u8]) -> Result<AttestationObject> {
    let value: Value = ciborium::from_reader(bytes)
        .map_err(|e| AttestationError::Malformed(e.to_string()))?;
    let map = as_map(&value, "attestation object")?;

    let fmt = match text_entry(map, "fmt") {
        Some(Value::Text(s)) => s.as_str(),
        _ => return Err(AttestationError::MissingField("fmt")),
    };
    let auth_data_bytes = match text_entry(map, "authData") {
        Some(Value::Bytes(b)) => b.clone(),
        _ => return Err(AttestationError::MissingField("authData")),
    };
    let att_stmt = match text_entry(map, "attStmt") {
        Some(v) => as_map(v, "attStmt")?,
        None => return Err(AttestationError::MissingField("attStmt")),
    };

    let statement = match fmt {
        "none" => {
            if !att_stmt.is_empty() {
                return Err(AttestationError::Malformed(
                    "attStmt must be empty for fmt none".into(),
                ));
            }
            AttestationStatement::None
        }
        "packed" => parse_packed(att_stmt)?,
        other => return Err(AttestationError::UnsupportedFormat(other.to_string())),
    };

    let auth_data = parse_auth_data(&auth_data_bytes)?;

    Ok(AttestationObject {
        statement,
        auth_data,
        auth_data_bytes,
    })
}

fn parse_packed(att_stmt: &[(Value, Value)]) -> Result<AttestationStatement> {
    if text_entry(att_stmt, "x5c").is_some() {
        return Err(AttestationError::UnsupportedFormat(
            "packed with certificate chain".into(),
        ));
    }

    match text_entry(att_stmt, "alg") {
        Some(Value::Integer(alg)) if i128::from(*alg) == COSE_ALG_EDDSA => {}
        Some(_) => {
            return Err(AttestationError::UnsupportedKey(
                "packed statement alg is not EdDSA".into(),
            ))
        }
        None => return Err(AttestationError::MissingField("alg")),
    }

    let signature = match text_entry(att_stmt, "sig") {
        Some(Value::Bytes(sig)) => Ed25519Signature::try_from(sig.as_slice())
            .map_err(|_| AttestationError::Malformed("sig is not 64 bytes".into()))?,
        _ => return Err(AttestationError::MissingField("sig")),
    };

    Ok(AttestationStatement::PackedSelf { signature })
}

/// Decode the binary `authData` structure.
pub fn parse_auth_data(bytes: &[u8]) -> Result<AuthenticatorData> {
    if bytes.len() < FIXED_HEADER_LEN {
        return Err(AttestationError::Malformed(format!(
            "authData is {} bytes, need at least {}",
            bytes.len(),
            FIXED_HEADER_LEN
        )));
    }

    let mut rp_id_hash = [0u8; RP_ID_HASH_LEN];
    rp_id_hash.copy_from_slice(&bytes[..RP_ID_HASH_LEN]);
    let flags = bytes[RP_ID_HASH_LEN];
    let mut count = [0u8; 4];
    count.copy_from_slice(&bytes[RP_ID_HASH_LEN + 1..FIXED_HEADER_LEN]);
    let sign_count = u32::from_be_bytes(count);

    let mut rest = &bytes[FIXED_HEADER_LEN..];

    let attested = if flags & FLAG_AT != 0 {
        Some(parse_attested_credential(&mut rest)?)
    } else {
        None
    };

    if flags & FLAG_ED != 0 {
        let _extensions: Value = ciborium::from_reader(&mut rest)
            .map_err(|e| AttestationError::Malformed(format!("extensions: {}", e)))?;
    }

    if !rest.is_empty() {
        return Err(AttestationError::Malformed(format!(
            "{} trailing bytes in authData",
            rest.len()
        )));
    }

    Ok(AuthenticatorData {
        rp_id_hash,
        flags,
        sign_count,
        attested,
    })
}

fn parse_attested_credential(rest: &mut &[u8]) -> Result<AttestedCredential> {
    if rest.len() < AAGUID_LEN + 2 {
        return Err(AttestationError::Malformed(
            "attested credential data truncated".into(),
        ));
    }

    let mut aaguid = [0u8; AAGUID_LEN];
    aaguid.copy_from_slice(&rest[..AAGUID_LEN]);
    let id_len = u16::from_be_bytes([rest[AAGUID_LEN], rest[AAGUID_LEN + 1]]) as usize;
    *rest = &rest[AAGUID_LEN + 2..];

    if rest.len() < id_len {
        return Err(AttestationError::Malformed(format!(
            "credential id claims {} bytes, {} remain",
            id_len,
            rest.len()
        )));
    }
    let credential_id = rest[..id_len].to_vec();
    *rest = &rest[id_len..];

    // Decoding advances `rest` past exactly one CBOR item.
    let cose: Value = ciborium::from_reader(&mut *rest)
        .map_err(|e| AttestationError::Malformed(format!("credential public key: {}", e)))?;
    let public_key = parse_cose_ed25519(&cose)?;

    Ok(AttestedCredential {
        aaguid,
        credential_id,
        public_key,
    })
}

/// Extract an Ed25519 public key from a COSE_Key map.
pub fn parse_cose_ed25519(value: &Value) -> Result<Ed25519PublicKey> {
    let map = as_map(value, "COSE_Key")?;

    let kty = int_entry(map, COSE_KTY).ok_or(AttestationError::MissingField("kty"))?;
    if kty != COSE_KTY_OKP {
        return Err(AttestationError::UnsupportedKey(format!("kty {}", kty)));
    }

    if let Some(alg) = int_entry(map, COSE_ALG) {
        if alg != COSE_ALG_EDDSA {
            return Err(AttestationError::UnsupportedKey(format!("alg {}", alg)));
        }
    }

    let crv = int_label_value(map, COSE_CRV)
        .and_then(as_int)
        .ok_or(AttestationError::MissingField("crv"))?;
    if crv != COSE_CRV_ED25519 {
        return Err(AttestationError::UnsupportedKey(format!("crv {}", crv)));
    }

    match int_label_value(map, COSE_X) {
        Some(Value::Bytes(x)) => Ed25519PublicKey::try_from(x.as_slice())
            .map_err(|_| AttestationError::UnsupportedKey(format!("x is {} bytes", x.len()))),
        _ => Err(AttestationError::MissingField("x")),
    }
}

/// Encode an Ed25519 public key as a COSE_Key map.
pub fn encode_cose_ed25519(key: &Ed25519PublicKey) -> Value {
    Value::Map(vec![
        (int(COSE_KTY), int(COSE_KTY_OKP)),
        (int(COSE_ALG), int(COSE_ALG_EDDSA)),
        (int(COSE_CRV), int(COSE_CRV_ED25519)),
        (int(COSE_X), Value::Bytes(key.as_bytes().to_vec())),
    ])
}

/// Build `authData` with attested credential data.
///
/// Used by authenticator bridges that receive the credential in a native
/// form and must hand it on as an attestation object.
pub fn encode_auth_data(
    rp_id: &str,
    flags: u8,
    sign_count: u32,
    aaguid: [u8; AAGUID_LEN],
    credential_id: &[u8],
    public_key: &Ed25519PublicKey,
) -> std::result::Result<Vec<u8>, AttestationError> {
    let id_len = u16::try_from(credential_id.len())
        .map_err(|_| AttestationError::Malformed("credential id too long".into()))?;

    let mut out = Vec::with_capacity(FIXED_HEADER_LEN + AAGUID_LEN + 2 + credential_id.len() + 48);
    out.extend_from_slice(&rp_id_hash(rp_id));
    out.push(flags | FLAG_AT);
    out.extend_from_slice(&sign_count.to_be_bytes());
    out.extend_from_slice(&aaguid);
    out.extend_from_slice(&id_len.to_be_bytes());
    out.extend_from_slice(credential_id);
    ciborium::into_writer(&encode_cose_ed25519(public_key), &mut out)
        .map_err(|e| AttestationError::Malformed(e.to_string()))?;
    Ok(out)
}

/// Build an attestation object around `authData`.
pub fn encode_attestation_object(
    statement: &AttestationStatement,
    auth_data: &[u8],
) -> std::result::Result<Vec<u8>, AttestationError> {
    let att_stmt = match statement {
        AttestationStatement::None => Value::Map(Vec::new()),
        AttestationStatement::PackedSelf { signature } => Value::Map(vec![
            (Value::Text("alg".into()), int(COSE_ALG_EDDSA)),
            (
                Value::Text("sig".into()),
                Value::Bytes(signature.as_bytes().to_vec()),
            ),
        ]),
    };

    let object = Value::Map(vec![
        (
            Value::Text("fmt".into()),
            Value::Text(statement.format().into()),
        ),
        (Value::Text("attStmt".into()), att_stmt),
        (Value::Text("authData".into()), Value::Bytes(auth_data.to_vec())),
    ]);

    let mut out = Vec::new();
    ciborium::into_writer(&object, &mut out)
        .map_err(|e| AttestationError::Malformed(e.to_string()))?;
    Ok(out)
}

// ─────────────────────────────────────────────────────────────────────────────
// CBOR helpers
// ─────────────────────────────────────────────────────────────────────────────

fn int(v: i128) -> Value {
    // All labels used here fit in i64.
    Value::Integer(Integer::from(v as i64))
}

fn as_int(value: &Value) -> Option<i128> {
    match value {
        Value::Integer(i) => Some(i128::from(*i)),
        _ => None,
    }
}

fn as_map<'a>(value: &'a Value, what: &str) -> Result<&'a [(Value, Value)]> {
    match value {
        Value::Map(entries) => Ok(entries),
        _ => Err(AttestationError::Malformed(format!("{} is not a map", what))),
    }
}

fn text_entry<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter().find_map(|(k, v)| match k {
        Value::Text(s) if s == key => Some(v),
        _ => None,
    })
}

fn int_label_value(map: &[(Value, Value)], label: i128) -> Option<&Value> {
    map.iter().find_map(|(k, v)| match k {
        Value::Integer(i) if i128::from(*i) == label => Some(v),
        _ => None,
    })
}

fn int_entry(map: &[(Value, Value)], label: i128) -> Option<i128> {
    int_label_value(map, label).and_then(as_int)
}
