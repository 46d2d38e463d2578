//! HTTP authentication for WinRM.
//!
//! A `DOMAIN\user` login selects NTLM; anything else is sent with Basic.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use hostexec_core::{ProvisionError, ProvisionResult};
use md4::{Digest, Md4};
use md5::Md5;

pub const DOMAIN_SEPARATOR: char = '\\';

#[derive(Clone, PartialEq, Eq)]
pub enum AuthScheme {
    Basic { username: String, password: String },
    Ntlm(NtlmAuth),
}

impl std::fmt::Debug for AuthScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthScheme::Basic { username, .. } => write!(f, "Basic({})", username),
            AuthScheme::Ntlm(n) => write!(f, "Ntlm({}\\{})", n.domain, n.username),
        }
    }
}

impl AuthScheme {
    /// NTLM when `username` carries a domain, Basic otherwise.
    pub fn select(username: &str, password: &str) -> Self {
        if username.contains(DOMAIN_SEPARATOR) {
            AuthScheme::Ntlm(NtlmAuth::new(username, password))
        } else {
            AuthScheme::Basic {
                username: username.to_string(),
                password: password.to_string(),
            }
        }
    }

    /// NTLM regardless of the username's shape.
    pub fn ntlm(username: &str, password: &str) -> Self {
        AuthScheme::Ntlm(NtlmAuth::new(username, password))
    }

    pub fn is_ntlm(&self) -> bool {
        matches!(self, AuthScheme::Ntlm(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            AuthScheme::Basic { .. } => "Basic",
            AuthScheme::Ntlm(_) => "NTLM",
        }
    }
}

pub fn basic_header(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password)))
}

// ─── NTLM ───────────────────────────────────────────────────────────────────

const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const NEGOTIATE_OEM: u32 = 0x0000_0002;
const REQUEST_TARGET: u32 = 0x0000_0004;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
const NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;
const NEGOTIATE_128: u32 = 0x2000_0000;
const NEGOTIATE_56: u32 = 0x8000_0000;

const CLIENT_FLAGS: u32 = NEGOTIATE_UNICODE
    | NEGOTIATE_OEM
    | REQUEST_TARGET
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSIONSECURITY
    | NEGOTIATE_128
    | NEGOTIATE_56;

/// Fixed part of the Type 3 message: header, six security buffers, flags,
/// version and MIC.
const AUTHENTICATE_PAYLOAD_OFFSET: usize = 88;

/// Three-message NTLMv2 handshake (negotiate, challenge, authenticate).
#[derive(Clone, PartialEq, Eq)]
pub struct NtlmAuth {
    pub(crate) domain: String,
    pub(crate) username: String,
    password: String,
    workstation: String,
}

impl NtlmAuth {
    /// `login` is either `DOMAIN\user` or a bare user name.
    pub fn new(login: &str, password: &str) -> Self {
        let (domain, username) = match login.split_once(DOMAIN_SEPARATOR) {
            Some((d, u)) => (d.to_string(), u.to_string()),
            None => (String::new(), login.to_string()),
        };
        let workstation = std::env::var("COMPUTERNAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "WORKSTATION".to_string())
            .to_uppercase();
        Self {
            domain,
            username,
            password: password.to_string(),
            workstation,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Type 1 message.
    pub fn negotiate_message(&self) -> Vec<u8> {
        let mut msg = Vec::with_capacity(32);
        msg.extend_from_slice(b"NTLMSSP\0");
        msg.extend_from_slice(&1u32.to_le_bytes());
        msg.extend_from_slice(&CLIENT_FLAGS.to_le_bytes());
        // Empty domain and workstation buffers.
        msg.extend_from_slice(&[0u8; 16]);
        msg
    }

    pub fn negotiate_header(&self) -> String {
        format!("Negotiate {}", STANDARD.encode(self.negotiate_message()))
    }

    /// Answer a `WWW-Authenticate: Negotiate <challenge>` header.
    pub fn authenticate_header(&self, www_authenticate: &str) -> ProvisionResult<String> {
        let token = www_authenticate
            .split(',')
            .map(str::trim)
            .find_map(|v| v.strip_prefix("Negotiate ").or_else(|| v.strip_prefix("NTLM ")))
            .ok_or_else(|| {
                ProvisionError::connection(format!(
                    "server did not send an NTLM challenge (WWW-Authenticate: {})",
                    www_authenticate
                ))
            })?;
        let challenge = STANDARD
            .decode(token.trim())
            .map_err(|e| ProvisionError::connection(format!("undecodable NTLM challenge: {}", e)))?;
        let msg = self.authenticate_message(&challenge)?;
        Ok(format!("Negotiate {}", STANDARD.encode(msg)))
    }

    /// Type 3 message for a Type 2 `challenge`.
    pub fn authenticate_message(&self, challenge: &[u8]) -> ProvisionResult<Vec<u8>> {
        let parsed = Challenge::parse(challenge)?;
        let client_challenge: [u8; 8] = rand::random();
        let timestamp = filetime_now();
        let ntlmv2_hash = self.ntlmv2_hash();

        let mut blob = Vec::with_capacity(32 + parsed.target_info.len());
        blob.extend_from_slice(&[0x01, 0x01, 0x00, 0x00]);
        blob.extend_from_slice(&[0u8; 4]);
        blob.extend_from_slice(&timestamp.to_le_bytes());
        blob.extend_from_slice(&client_challenge);
        blob.extend_from_slice(&[0u8; 4]);
        blob.extend_from_slice(&parsed.target_info);
        blob.extend_from_slice(&[0u8; 4]);

        let mut proof_input = parsed.server_challenge.to_vec();
        proof_input.extend_from_slice(&blob);
        let mut nt_response = hmac_md5(&ntlmv2_hash, &proof_input)?.to_vec();
        nt_response.extend_from_slice(&blob);

        let mut lm_input = parsed.server_challenge.to_vec();
        lm_input.extend_from_slice(&client_challenge);
        let mut lm_response = hmac_md5(&ntlmv2_hash, &lm_input)?.to_vec();
        lm_response.extend_from_slice(&client_challenge);

        let domain = utf16le(&self.domain);
        let user = utf16le(&self.username);
        let workstation = utf16le(&self.workstation);

        let mut msg = Vec::with_capacity(AUTHENTICATE_PAYLOAD_OFFSET + 256);
        msg.extend_from_slice(b"NTLMSSP\0");
        msg.extend_from_slice(&3u32.to_le_bytes());

        let mut offset = AUTHENTICATE_PAYLOAD_OFFSET as u32;
        for field in [&lm_response, &nt_response, &domain, &user, &workstation] {
            let len = field.len() as u16;
            msg.extend_from_slice(&len.to_le_bytes());
            msg.extend_from_slice(&len.to_le_bytes());
            msg.extend_from_slice(&offset.to_le_bytes());
            offset += len as u32;
        }
        // Empty session key.
        msg.extend_from_slice(&0u16.to_le_bytes());
        msg.extend_from_slice(&0u16.to_le_bytes());
        msg.extend_from_slice(&offset.to_le_bytes());

        let mut flags = (parsed.flags & CLIENT_FLAGS) | NEGOTIATE_UNICODE | NEGOTIATE_NTLM;
        if !parsed.target_info.is_empty() {
            flags |= NEGOTIATE_TARGET_INFO;
        }
        msg.extend_from_slice(&flags.to_le_bytes());
        msg.resize(AUTHENTICATE_PAYLOAD_OFFSET, 0);

        msg.extend_from_slice(&lm_response);
        msg.extend_from_slice(&nt_response);
        msg.extend_from_slice(&domain);
        msg.extend_from_slice(&user);
        msg.extend_from_slice(&workstation);
        Ok(msg)
    }

    pub(crate) fn nt_hash(&self) -> [u8; 16] {
        let mut hasher = Md4::new();
        hasher.update(utf16le(&self.password));
        hasher.finalize().into()
    }

    pub(crate) fn ntlmv2_hash(&self) -> [u8; 16] {
        let identity = utf16le(&format!("{}{}", self.username.to_uppercase(), self.domain));
        // A 16-byte key is always a valid HMAC key.
        hmac_md5(&self.nt_hash(), &identity).unwrap_or_default()
    }
}

struct Challenge {
    flags: u32,
    server_challenge: [u8; 8],
    target_info: Vec<u8>,
}

impl Challenge {
    fn parse(msg: &[u8]) -> ProvisionResult<Self> {
        if msg.len() < 32 || &msg[..8] != b"NTLMSSP\0" || u32_at(msg, 8) != 2 {
            return Err(ProvisionError::connection("malformed NTLM challenge message"));
        }
        let flags = u32_at(msg, 20);
        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(&msg[24..32]);

        let target_info = if msg.len() >= 48 {
            let len = u16::from_le_bytes([msg[40], msg[41]]) as usize;
            let off = u32_at(msg, 44) as usize;
            msg.get(off..off + len)
                .ok_or_else(|| ProvisionError::connection("NTLM target info out of bounds"))?
                .to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            flags,
            server_challenge,
            target_info,
        })
    }
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
}

fn hmac_md5(key: &[u8], data: &[u8]) -> ProvisionResult<[u8; 16]> {
    let mut mac = Hmac::<Md5>::new_from_slice(key)
        .map_err(|e| ProvisionError::connection(format!("HMAC error: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Windows FILETIME: 100ns ticks since 1601-01-01.
fn filetime_now() -> u64 {
    const EPOCH_DIFF_SECS: i64 = 11_644_473_600;
    let now = chrono::Utc::now();
    let secs = (now.timestamp() + EPOCH_DIFF_SECS) as u64;
    secs * 10_000_000 + (now.timestamp_subsec_nanos() / 100) as u64
}
