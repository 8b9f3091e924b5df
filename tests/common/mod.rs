// Scripted debugging engine for integration tests.
//
// Tests bind a Server, spawn a task that plays the engine side of the
// socket, and assert on both ends. The engine half reads NUL-terminated
// commands and answers with framed XML documents.

use std::collections::HashMap;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const INIT: &str = r#"<init appid="fake-engine" idekey="IDEKEY" session="sess-1" thread="1" parent="" language="PHP" protocol_version="1.0" fileuri="file:///srv/index.php"/>"#;

/// Install a fmt subscriber honoring RUST_LOG. Safe to call from every
/// test; only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// One command as the engine sees it.
#[derive(Debug)]
pub struct Command {
    pub name: String,
    pub flags: HashMap<String, String>,
    pub data: Option<Vec<u8>>,
}

impl Command {
    pub fn txid(&self) -> &str {
        self.flags.get("-i").map(String::as_str).unwrap_or("")
    }

    pub fn flag(&self, name: &str) -> Option<&str> {
        self.flags.get(name).map(String::as_str)
    }
}

/// Write one framed XML document: decimal length, NUL, body, NUL.
pub async fn send_frame(stream: &mut TcpStream, xml: &str) {
    let mut out = xml.len().to_string().into_bytes();
    out.push(0);
    out.extend_from_slice(xml.as_bytes());
    out.push(0);
    stream.write_all(&out).await.unwrap();
    stream.flush().await.unwrap();
}

pub async fn send_init(stream: &mut TcpStream) {
    send_frame(stream, INIT).await;
}

/// Read one NUL-terminated command line and parse it.
pub async fn read_command(stream: &mut TcpStream) -> Command {
    let mut raw = Vec::new();
    loop {
        let byte = stream.read_u8().await.unwrap();
        if byte == 0 {
            break;
        }
        raw.push(byte);
    }
    parse_command(&String::from_utf8(raw).unwrap())
}

fn parse_command(line: &str) -> Command {
    let (line, data) = match line.split_once(" -- ") {
        Some((head, b64)) => {
            use base64::Engine as _;
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(b64.trim())
                .unwrap();
            (head, Some(decoded))
        }
        None => (line, None),
    };

    let tokens = tokenize(line);
    let mut flags = HashMap::new();
    let mut i = 1;
    while i < tokens.len() {
        if i + 1 < tokens.len() {
            flags.insert(tokens[i].clone(), tokens[i + 1].clone());
            i += 2;
        } else {
            flags.insert(tokens[i].clone(), String::new());
            i += 1;
        }
    }

    Command {
        name: tokens[0].clone(),
        flags,
        data,
    }
}

fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ' ' {
            continue;
        }
        let mut token = String::new();
        if c == '"' {
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                token.push(c);
            }
        } else {
            token.push(c);
            while let Some(&c) = chars.peek() {
                if c == ' ' {
                    break;
                }
                token.push(c);
                chars.next();
            }
        }
        tokens.push(token);
    }
    tokens
}

/// Answer the client's feature negotiation, output redirection, and typemap
/// fetch. Returns once typemap_get has been answered; `break` and `detach`
/// probe as supported, `exec` and `expr` as unsupported.
pub async fn run_handshake(stream: &mut TcpStream) {
    loop {
        let cmd = read_command(stream).await;
        let txid = cmd.txid().to_string();
        match cmd.name.as_str() {
            "feature_set" => {
                let feature = cmd.flag("-n").unwrap().to_string();
                send_frame(
                    stream,
                    &format!(
                        r#"<response command="feature_set" transaction_id="{txid}" feature="{feature}" success="1"/>"#
                    ),
                )
                .await;
            }
            "feature_get" => {
                let feature = cmd.flag("-n").unwrap();
                let xml = match feature {
                    "break" | "detach" => format!(
                        r#"<response command="feature_get" transaction_id="{txid}" feature_name="{feature}" supported="1">1</response>"#
                    ),
                    _ => format!(
                        r#"<response command="feature_get" transaction_id="{txid}" feature_name="{feature}" supported="0"/>"#
                    ),
                };
                send_frame(stream, &xml).await;
            }
            "stdout" | "stderr" => {
                let name = cmd.name.clone();
                send_frame(
                    stream,
                    &format!(
                        r#"<response command="{name}" transaction_id="{txid}" success="1"/>"#
                    ),
                )
                .await;
            }
            "typemap_get" => {
                send_frame(
                    stream,
                    &format!(
                        r#"<response command="typemap_get" transaction_id="{txid}">
                            <map type="bool" name="bool" xsi:type="xsd:boolean"/>
                            <map type="int" name="int" xsi:type="xsd:int"/>
                            <map type="float" name="float" xsi:type="xsd:float"/>
                            <map type="string" name="string" xsi:type="xsd:string"/>
                            <map type="array" name="array"/>
                        </response>"#
                    ),
                )
                .await;
                return;
            }
            other => panic!("unexpected handshake command '{}'", other),
        }
    }
}
