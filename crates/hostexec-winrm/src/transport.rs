//! WS-Management shell transport.
//!
//! SOAP envelopes over HTTP(S) for the `cmd` shell resource: create a shell,
//! run commands in it, collect their streams and delete it again.

use std::error::Error as StdError;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hostexec_core::{ProvisionError, ProvisionResult};
use log::{debug, trace, warn};
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use uuid::Uuid;

use crate::auth::{basic_header, AuthScheme};
use crate::config::WinRmConfig;

// ─── Protocol constants ─────────────────────────────────────────────────────

pub mod ns {
    pub const SOAP: &str = "http://www.w3.org/2003/05/soap-envelope";
    pub const ADDRESSING: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
    pub const WSMAN: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
    pub const SHELL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";
}

pub mod action {
    pub const CREATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create";
    pub const DELETE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete";
    pub const COMMAND: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command";
    pub const RECEIVE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive";
    pub const SIGNAL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal";
}

pub const CMD_SHELL_URI: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";
pub const SIGNAL_TERMINATE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";
const COMMAND_STATE_DONE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Done";
/// WSManFault code for a Receive that timed out without new output.
const RECEIVE_TIMED_OUT: &str = "2150858793";

const SOAP_CONTENT_TYPE: &str = "application/soap+xml;charset=UTF-8";

// ─── Transport seam ─────────────────────────────────────────────────────────

/// Collected output of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

#[async_trait]
pub trait ShellTransport: Send + Sync {
    /// Create a remote shell and return its id.
    async fn open_shell(&mut self) -> ProvisionResult<String>;

    /// Run `command args..` in `shell_id` to completion.
    async fn run_command(
        &mut self,
        shell_id: &str,
        command: &str,
        args: &[String],
    ) -> ProvisionResult<ShellOutput>;

    async fn close_shell(&mut self, shell_id: &str) -> ProvisionResult<()>;
}

/// `powershell.exe` arguments running `script` via `-EncodedCommand`.
pub fn powershell_args(script: &str) -> Vec<String> {
    let script = format!("$ProgressPreference = 'SilentlyContinue'; {}", script);
    let utf16: Vec<u8> = script.encode_utf16().flat_map(|c| c.to_le_bytes()).collect();
    vec![
        "-NoProfile".to_string(),
        "-NonInteractive".to_string(),
        "-EncodedCommand".to_string(),
        STANDARD.encode(utf16),
    ]
}

pub const POWERSHELL: &str = "powershell.exe";

/// Render an error with its whole source chain; reqwest keeps the
/// interesting part ("Connection refused", "timed out") in the sources.
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let s = inner.to_string();
        if !text.contains(&s) {
            text.push_str(": ");
            text.push_str(&s);
        }
        source = inner.source();
    }
    text
}

// ─── HTTP implementation ────────────────────────────────────────────────────

pub struct WinRmTransport {
    client: reqwest::Client,
    endpoint: String,
    auth: AuthScheme,
    operation_timeout: String,
    request_counter: u64,
}

impl std::fmt::Debug for WinRmTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WinRmTransport")
            .field("endpoint", &self.endpoint)
            .field("auth", &self.auth)
            .finish()
    }
}

impl WinRmTransport {
    /// Transport with auth chosen from the username.
    pub fn new(config: &WinRmConfig) -> ProvisionResult<Self> {
        Self::with_auth(config, AuthScheme::select(&config.username, &config.password))
    }

    pub fn with_auth(config: &WinRmConfig, auth: AuthScheme) -> ProvisionResult<Self> {
        let endpoint = config.endpoint()?.to_string();

        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout());
        if config.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|e| ProvisionError::connection(format!("unable to build HTTP client: {}", e)))?;

        debug!("WinRM transport for {} using {} auth", endpoint, auth.name());
        Ok(Self {
            client,
            endpoint,
            auth,
            operation_timeout: config.operation_timeout(),
            request_counter: 0,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn auth(&self) -> &AuthScheme {
        &self.auth
    }

    async fn post(&self, authorization: String, body: String) -> ProvisionResult<reqwest::Response> {
        let auth = HeaderValue::from_str(&authorization)
            .map_err(|e| ProvisionError::connection(format!("invalid auth header: {}", e)))?;
        self.client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .header(AUTHORIZATION, auth)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                ProvisionError::connection(format!(
                    "WinRM request to {} failed: {}",
                    self.endpoint,
                    error_chain(&e)
                ))
            })
    }

    /// Send one SOAP envelope and return the response body.
    pub async fn send_message(&mut self, envelope: &str) -> ProvisionResult<String> {
        self.request_counter += 1;
        let req_id = self.request_counter;
        debug!("WinRM request #{} to {} ({} bytes)", req_id, self.endpoint, envelope.len());
        trace!("WinRM request #{} body:\n{}", req_id, envelope);

        let response = match &self.auth {
            AuthScheme::Basic { username, password } => {
                self.post(basic_header(username, password), envelope.to_string())
                    .await?
            }
            AuthScheme::Ntlm(ntlm) => {
                let challenge = self.post(ntlm.negotiate_header(), String::new()).await?;
                if challenge.status() != StatusCode::UNAUTHORIZED {
                    return Err(ProvisionError::connection(format!(
                        "expected NTLM challenge, got HTTP {}",
                        challenge.status()
                    )));
                }
                let www = challenge
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        ProvisionError::connection("HTTP 401 Unauthorized without an NTLM challenge")
                    })?;
                // Drain so the connection is reused for the authenticate leg.
                let _ = challenge.bytes().await;
                let header = ntlm.authenticate_header(&www)?;
                self.post(header, envelope.to_string()).await?
            }
        };

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            ProvisionError::connection(format!("unable to read WinRM response: {}", error_chain(&e)))
        })?;
        trace!("WinRM response #{}: status={}, body:\n{}", req_id, status, body);

        if status == StatusCode::UNAUTHORIZED {
            return Err(ProvisionError::connection(format!(
                "HTTP 401 Unauthorized from {}",
                self.endpoint
            )));
        }
        if !status.is_success() {
            let fault = parse_soap_fault(&body).unwrap_or_else(|| body.clone());
            return Err(ProvisionError::connection(format!("WinRM error (HTTP {}): {}", status, fault)));
        }
        Ok(body)
    }

    async fn receive_all(&mut self, shell_id: &str, command_id: &str) -> ProvisionResult<ShellOutput> {
        let mut output = ShellOutput::default();
        loop {
            let envelope = build_receive_envelope(&self.endpoint, shell_id, command_id, &self.operation_timeout);
            let response = match self.send_message(&envelope).await {
                Ok(r) => r,
                Err(e) if e.message.contains(RECEIVE_TIMED_OUT) => {
                    trace!("receive on {} timed out, polling again", command_id);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let chunk = parse_receive_response(&response);
            output.stdout.push_str(&chunk.stdout);
            output.stderr.push_str(&chunk.stderr);
            if chunk.exit_code.is_some() {
                output.exit_code = chunk.exit_code;
            }
            if chunk.done {
                return Ok(output);
            }
        }
    }
}

#[async_trait]
impl ShellTransport for WinRmTransport {
    async fn open_shell(&mut self) -> ProvisionResult<String> {
        let envelope = build_create_shell_envelope(&self.endpoint, &self.operation_timeout);
        let response = self.send_message(&envelope).await?;
        let shell_id = extract_shell_id(&response)
            .ok_or_else(|| ProvisionError::connection("create shell response carried no ShellId"))?;
        debug!("created WinRM shell {}", shell_id);
        Ok(shell_id)
    }

    async fn run_command(
        &mut self,
        shell_id: &str,
        command: &str,
        args: &[String],
    ) -> ProvisionResult<ShellOutput> {
        let envelope = build_command_envelope(&self.endpoint, shell_id, command, args, &self.operation_timeout);
        let response = self
            .send_message(&envelope)
            .await
            .map_err(|e| ProvisionError::command(e.message))?;
        let command_id = extract_command_id(&response)
            .ok_or_else(|| ProvisionError::command("command response carried no CommandId"))?;

        let output = self
            .receive_all(shell_id, &command_id)
            .await
            .map_err(|e| ProvisionError::command(e.message))?;

        let signal = build_signal_envelope(&self.endpoint, shell_id, &command_id, &self.operation_timeout);
        if let Err(e) = self.send_message(&signal).await {
            warn!("terminating command {} failed: {}", command_id, e);
        }
        Ok(output)
    }

    async fn close_shell(&mut self, shell_id: &str) -> ProvisionResult<()> {
        let envelope = build_delete_shell_envelope(&self.endpoint, shell_id, &self.operation_timeout);
        self.send_message(&envelope).await?;
        debug!("deleted WinRM shell {}", shell_id);
        Ok(())
    }
}

// ─── SOAP envelope builders ─────────────────────────────────────────────────

fn build_soap_header(action: &str, endpoint: &str, shell_id: Option<&str>, timeout: &str) -> String {
    let mut header = format!(
        r#"<s:Header>
      <a:To>{endpoint}</a:To>
      <a:Action s:mustUnderstand="true">{action}</a:Action>
      <w:ResourceURI s:mustUnderstand="true">{resource}</w:ResourceURI>
      <a:MessageID>uuid:{message_id}</a:MessageID>
      <a:ReplyTo>
        <a:Address s:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous</a:Address>
      </a:ReplyTo>
      <w:MaxEnvelopeSize s:mustUnderstand="true">153600</w:MaxEnvelopeSize>
      <w:Locale xml:lang="en-US" s:mustUnderstand="false"/>
      <w:OperationTimeout>{timeout}</w:OperationTimeout>"#,
        endpoint = xml_escape(endpoint),
        action = action,
        resource = CMD_SHELL_URI,
        message_id = Uuid::new_v4().to_string().to_uppercase(),
        timeout = timeout,
    );

    if let Some(sid) = shell_id {
        header.push_str(&format!(
            r#"
      <w:SelectorSet>
        <w:Selector Name="ShellId">{}</w:Selector>
      </w:SelectorSet>"#,
            xml_escape(sid)
        ));
    }
    header.push_str("\n    </s:Header>");
    header
}

fn wrap_envelope(header: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="{soap}" xmlns:a="{addr}" xmlns:w="{wsman}" xmlns:rsp="{shell}">
    {header}
    <s:Body>
      {body}
    </s:Body>
</s:Envelope>"#,
        soap = ns::SOAP,
        addr = ns::ADDRESSING,
        wsman = ns::WSMAN,
        shell = ns::SHELL,
        header = header,
        body = body,
    )
}

pub(crate) fn build_create_shell_envelope(endpoint: &str, timeout: &str) -> String {
    let header = build_soap_header(action::CREATE, endpoint, None, timeout)
        .replace(
            "\n    </s:Header>",
            r#"
      <w:OptionSet>
        <w:Option Name="WINRS_NOPROFILE">FALSE</w:Option>
        <w:Option Name="WINRS_CODEPAGE">65001</w:Option>
      </w:OptionSet>
    </s:Header>"#,
        );
    let body = r#"<rsp:Shell>
        <rsp:InputStreams>stdin</rsp:InputStreams>
        <rsp:OutputStreams>stdout stderr</rsp:OutputStreams>
      </rsp:Shell>"#;
    wrap_envelope(&header, body)
}

pub(crate) fn build_delete_shell_envelope(endpoint: &str, shell_id: &str, timeout: &str) -> String {
    let header = build_soap_header(action::DELETE, endpoint, Some(shell_id), timeout);
    wrap_envelope(&header, "")
}

pub(crate) fn build_command_envelope(
    endpoint: &str,
    shell_id: &str,
    command: &str,
    arguments: &[String],
    timeout: &str,
) -> String {
    let header = build_soap_header(action::COMMAND, endpoint, Some(shell_id), timeout);
    let args_xml = arguments
        .iter()
        .map(|a| format!("<rsp:Arguments>{}</rsp:Arguments>", xml_escape(a)))
        .collect::<Vec<_>>()
        .join("\n        ");
    let body = format!(
        r#"<rsp:CommandLine>
        <rsp:Command>{command}</rsp:Command>
        {args}
      </rsp:CommandLine>"#,
        command = xml_escape(command),
        args = args_xml,
    );
    wrap_envelope(&header, &body)
}

pub(crate) fn build_receive_envelope(endpoint: &str, shell_id: &str, command_id: &str, timeout: &str) -> String {
    let header = build_soap_header(action::RECEIVE, endpoint, Some(shell_id), timeout);
    let body = format!(
        r#"<rsp:Receive>
        <rsp:DesiredStream CommandId="{}">stdout stderr</rsp:DesiredStream>
      </rsp:Receive>"#,
        xml_escape(command_id),
    );
    wrap_envelope(&header, &body)
}

pub(crate) fn build_signal_envelope(endpoint: &str, shell_id: &str, command_id: &str, timeout: &str) -> String {
    let header = build_soap_header(action::SIGNAL, endpoint, Some(shell_id), timeout);
    let body = format!(
        r#"<rsp:Signal CommandId="{}">
        <rsp:Code>{}</rsp:Code>
      </rsp:Signal>"#,
        xml_escape(command_id),
        SIGNAL_TERMINATE,
    );
    wrap_envelope(&header, &body)
}

// ─── Response parsers ───────────────────────────────────────────────────────

fn attribute_or_element(response: &str, attribute: &str, element: &str) -> Option<String> {
    let attr = format!("{}=\"", attribute);
    if let Some(start) = response.find(&attr) {
        let rest = &response[start + attr.len()..];
        if let Some(end) = rest.find('"') {
            return Some(rest[..end].to_string());
        }
    }
    let open = format!("<{}>", element);
    if let Some(start) = response.find(&open) {
        let rest = &response[start + open.len()..];
        if let Some(end) = rest.find('<') {
            return Some(rest[..end].trim().to_string());
        }
    }
    None
}

pub(crate) fn extract_shell_id(response: &str) -> Option<String> {
    attribute_or_element(response, "ShellId", "rsp:ShellId")
        .or_else(|| {
            // Some servers only echo it back in the selector.
            let marker = r#"<w:Selector Name="ShellId">"#;
            let start = response.find(marker)? + marker.len();
            let end = response[start..].find('<')?;
            Some(response[start..start + end].trim().to_string())
        })
        .filter(|id| !id.is_empty())
}

pub(crate) fn extract_command_id(response: &str) -> Option<String> {
    attribute_or_element(response, "CommandId", "rsp:CommandId").filter(|id| !id.is_empty())
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ReceiveChunk {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub done: bool,
}

pub(crate) fn parse_receive_response(response: &str) -> ReceiveChunk {
    let mut chunk = ReceiveChunk::default();
    extract_stream_data(response, "stdout", &mut chunk.stdout);
    extract_stream_data(response, "stderr", &mut chunk.stderr);
    chunk.done = response.contains(COMMAND_STATE_DONE);

    if let Some(start) = response.find("<rsp:ExitCode>") {
        let start = start + "<rsp:ExitCode>".len();
        if let Some(end) = response[start..].find("</rsp:ExitCode>") {
            chunk.exit_code = response[start..start + end].trim().parse().ok();
        }
    }
    chunk
}

fn extract_stream_data(response: &str, stream_name: &str, output: &mut String) {
    let pattern = format!("Name=\"{}\"", stream_name);
    let mut search_from = 0;

    while let Some(attr_pos) = response[search_from..].find(&pattern) {
        let abs_pos = search_from + attr_pos;
        let Some(gt_pos) = response[abs_pos..].find('>') else { break };
        // Self-closing stream element (End="true" with no data).
        if response[..abs_pos + gt_pos].ends_with('/') {
            search_from = abs_pos + gt_pos + 1;
            continue;
        }
        let data_start = abs_pos + gt_pos + 1;
        let Some(end_pos) = response[data_start..].find("</rsp:Stream>") else { break };
        let encoded = response[data_start..data_start + end_pos].trim();
        if !encoded.is_empty() {
            if let Ok(decoded) = STANDARD.decode(encoded) {
                output.push_str(&String::from_utf8_lossy(&decoded));
            }
        }
        search_from = data_start + end_pos;
    }
}

/// Human-readable fault text from an error response.
pub fn parse_soap_fault(response: &str) -> Option<String> {
    if let Some(start) = response.find("<f:Message>") {
        let text_start = start + "<f:Message>".len();
        if let Some(end) = response[text_start..].find("</f:Message>") {
            let code = attribute_or_element(response, "Code", "f:Code");
            let msg = response[text_start..text_start + end].trim().to_string();
            return Some(match code {
                Some(code) => format!("{} (code {})", msg, code),
                None => msg,
            });
        }
    }
    if let Some(start) = response.find("<s:Text") {
        if let Some(gt) = response[start..].find('>') {
            let text_start = start + gt + 1;
            if let Some(end) = response[text_start..].find("</s:Text>") {
                return Some(response[text_start..text_start + end].trim().to_string());
            }
        }
    }
    None
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
