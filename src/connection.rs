// DBGp connection management
//
// The engine connects to us. Accepting a socket runs the init handshake and
// feature negotiation sequentially on the stream, then splits it and hands
// both halves to the message pump. Everything after that point talks to the
// engine through the pump.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::arguments::MessageArguments;
use crate::breakpoint::Breakpoint;
use crate::error::{DbgpError, DbgpResult};
use crate::eventloop::{dispatch_unsolicited, emit, spawn_pump, Link, Shared};
use crate::events::{ConnectionEvent, InitPacket};
use crate::protocol::{encode_command, read_message};
use crate::stack::Stack;
use crate::typemap::{CommonType, Type, Typemap};
use crate::xml::{decode_encoded_content, Element};

/// Size of the per-connection event channel. Events are dropped (and logged)
/// if the consumer falls this far behind.
const EVENT_BUFFER: usize = 256;

/// The possible states of the DBGp engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineStatus {
    /// Engine starting, yet to run.
    Starting,
    /// Run complete, engine stopping.
    Stopping,
    /// Detached, no further interaction possible.
    Stopped,
    /// Code is running.
    Running,
    /// Code execution has paused.
    Break,
}

impl EngineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineStatus::Starting => "starting",
            EngineStatus::Stopping => "stopping",
            EngineStatus::Stopped => "stopped",
            EngineStatus::Running => "running",
            EngineStatus::Break => "break",
        }
    }

    pub fn from_str(s: &str) -> DbgpResult<EngineStatus> {
        match s {
            "starting" => Ok(EngineStatus::Starting),
            "stopping" => Ok(EngineStatus::Stopping),
            "stopped" => Ok(EngineStatus::Stopped),
            "running" => Ok(EngineStatus::Running),
            "break" => Ok(EngineStatus::Break),
            other => Err(DbgpError::NotFound(format!("unknown status '{}'", other))),
        }
    }
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One connection to a debugging engine.
#[derive(Debug)]
pub struct Connection {
    link: Link,
    shared: Arc<Shared>,
    typemap: Arc<Typemap>,
    supported: HashMap<String, bool>,
    init: InitPacket,
    peer: SocketAddr,
    breakpoints: tokio::sync::Mutex<Vec<Breakpoint>>,
}

impl Connection {
    /// Take ownership of an accepted engine socket, run the init handshake
    /// and feature negotiation, and start the message pump.
    ///
    /// Returns the connection and its event channel; the `Connected` event
    /// is already queued on it.
    pub async fn accept(
        mut stream: TcpStream,
    ) -> DbgpResult<(Connection, mpsc::Receiver<ConnectionEvent>)> {
        let peer = stream.peer_addr()?;
        info!("engine connected from {}", peer);

        let (link, command_rx) = Link::new();
        let shared = Arc::new(Shared::new());
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        // The engine speaks first.
        let mut root = read_message(&mut stream).await?;
        decode_encoded_content(&mut root);
        if root.name != "init" {
            return Err(DbgpError::MalformedDocument(format!(
                "expected init packet, got '{}'",
                root.name
            )));
        }
        let init = parse_init(&root);
        debug!(
            "init from appid '{}', language '{}', fileuri '{}'",
            init.appid, init.language, init.fileuri
        );

        let mut handshake = Handshake {
            stream: &mut stream,
            link: &link,
            shared: &shared,
            event_tx: &event_tx,
        };

        let mut supported = HashMap::new();
        handshake.negotiate_features(&mut supported).await?;
        handshake.copy_output().await;
        let typemap = handshake.typemap_get().await?;

        emit(&event_tx, ConnectionEvent::Connected(init.clone()));

        let (reader, writer) = stream.into_split();
        spawn_pump(reader, writer, command_rx, shared.clone(), event_tx);

        Ok((
            Connection {
                link,
                shared,
                typemap: Arc::new(typemap),
                supported,
                init,
                peer,
                breakpoints: tokio::sync::Mutex::new(Vec::new()),
            },
            event_rx,
        ))
    }

    /// The init handshake fields the engine announced.
    pub fn init(&self) -> &InitPacket {
        &self.init
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the engine supports a command. Commands that were never
    /// probed are assumed supported.
    pub fn command_supported(&self, command: &str) -> bool {
        self.supported.get(command).copied().unwrap_or(true)
    }

    /// The engine's typemap, fetched during the handshake.
    pub fn typemap(&self) -> &Typemap {
        &self.typemap
    }

    /// The last status the engine reported (or that we set optimistically
    /// on a continuation command).
    pub fn status(&self) -> EngineStatus {
        self.shared.status()
    }

    /// Ask the engine for its status. Returns the status and the engine's
    /// reason string.
    pub async fn query_status(&self) -> DbgpResult<(EngineStatus, String)> {
        let root = self
            .link
            .send_wait("status", MessageArguments::new(), None)
            .await?;

        let status = EngineStatus::from_str(root.attr_or("status", ""))
            .map_err(|_| DbgpError::MalformedDocument("invalid status".into()))?;
        self.shared.set_status(status);

        Ok((status, root.attr_or("reason", "").to_string()))
    }

    /// Tell the engine to run until the next breakpoint.
    pub async fn run(&self) -> DbgpResult<()> {
        self.continuation("run").await
    }

    /// Step into the next statement.
    pub async fn step_into(&self) -> DbgpResult<()> {
        self.continuation("step_into").await
    }

    /// Step out of the current frame.
    pub async fn step_out(&self) -> DbgpResult<()> {
        self.continuation("step_out").await
    }

    /// Step over the next statement.
    pub async fn step_over(&self) -> DbgpResult<()> {
        self.continuation("step_over").await
    }

    /// Tell the engine to stop execution.
    pub async fn stop(&self) -> DbgpResult<()> {
        self.link.fire("stop", MessageArguments::new(), None).await
    }

    /// Tell the engine to break immediately. Fails if the engine's `break`
    /// capability probe came back negative.
    pub async fn break_now(&self) -> DbgpResult<()> {
        self.require_supported("break")?;
        self.link.fire("break", MessageArguments::new(), None).await
    }

    /// Detach the debugger from the engine. Fails if the engine's `detach`
    /// capability probe came back negative.
    pub async fn detach(&self) -> DbgpResult<()> {
        self.require_supported("detach")?;
        self.link
            .fire("detach", MessageArguments::new(), None)
            .await
    }

    /// Retrieve the current value of an engine feature.
    pub async fn feature_get(&self, name: &str) -> DbgpResult<String> {
        let args = MessageArguments::new().append_with("-n", name);
        let root = self.link.send_wait("feature_get", args, None).await?;
        parse_feature_get(&root, name)
    }

    /// Set an engine feature. Returns whether the engine accepted it.
    pub async fn feature_set(&self, name: &str, value: &str) -> DbgpResult<bool> {
        let args = MessageArguments::new()
            .append_with("-n", name)
            .append_with("-v", value);
        let root = self.link.send_wait("feature_set", args, None).await?;
        Ok(parse_feature_set(&root))
    }

    /// Retrieve source text from the engine. With no file URI the engine
    /// returns the source for the current context.
    pub async fn source(
        &self,
        file_uri: Option<&str>,
        begin_line: Option<u32>,
        end_line: Option<u32>,
    ) -> DbgpResult<String> {
        let mut args = MessageArguments::new();
        if let Some(uri) = file_uri {
            args = args.append_with("-f", uri);
        }
        if let Some(begin) = begin_line {
            args = args.append_with("-b", &begin.to_string());
        }
        if let Some(end) = end_line {
            args = args.append_with("-e", &end.to_string());
        }

        let root = match self.link.send_wait("source", args, None).await {
            Ok(root) => root,
            Err(DbgpError::Engine { code: 100, .. }) => {
                return Err(DbgpError::NotFound(format!(
                    "source file not found: {}",
                    file_uri.unwrap_or("<current>")
                )));
            }
            Err(e) => return Err(e),
        };

        // DBGp documents a success attribute; Xdebug omits it. Assume
        // success when absent.
        if root.attr_or("success", "1") == "0" {
            return Err(DbgpError::NotFound(format!(
                "source of '{}' failed",
                file_uri.unwrap_or("<current>")
            )));
        }
        Ok(root.text.clone())
    }

    /// Create a breakpoint. It is inert until one of its type setters is
    /// called, which performs the first `breakpoint_set`.
    pub fn create_breakpoint(&self) -> Breakpoint {
        Breakpoint::new(self.link.clone())
    }

    /// Hand a breakpoint to the connection to own.
    pub async fn adopt_breakpoint(&self, breakpoint: Breakpoint) {
        self.breakpoints.lock().await.push(breakpoint);
    }

    /// The breakpoints this connection owns. The guard allows mutating
    /// individual breakpoints in place.
    pub async fn breakpoints(&self) -> tokio::sync::MutexGuard<'_, Vec<Breakpoint>> {
        self.breakpoints.lock().await
    }

    /// One owned breakpoint by its server-assigned id.
    pub async fn get_breakpoint(
        &self,
        id: &str,
    ) -> DbgpResult<tokio::sync::MappedMutexGuard<'_, Breakpoint>> {
        let guard = self.breakpoints.lock().await;
        tokio::sync::MutexGuard::try_map(guard, |breakpoints| {
            breakpoints.iter_mut().find(|b| b.id() == id)
        })
        .map_err(|_| DbgpError::NotFound(format!("breakpoint '{}' not found", id)))
    }

    /// Server-assigned ids of all owned breakpoints that have been set.
    pub async fn breakpoint_ids(&self) -> Vec<String> {
        self.breakpoints
            .lock()
            .await
            .iter()
            .filter(|b| b.is_set())
            .map(|b| b.id().to_string())
            .collect()
    }

    /// Remove an owned breakpoint by its server-assigned id, telling the
    /// engine to drop it too.
    pub async fn remove_breakpoint(&self, id: &str) -> DbgpResult<()> {
        let mut breakpoints = self.breakpoints.lock().await;
        let index = breakpoints
            .iter()
            .position(|b| b.id() == id)
            .ok_or_else(|| DbgpError::NotFound(format!("breakpoint '{}' not found", id)))?;
        let breakpoint = breakpoints.remove(index);
        drop(breakpoints);

        breakpoint.remove().await
    }

    /// Snapshot the engine's call stack. The snapshot is stale the moment
    /// the engine resumes; fetch a fresh one after every break.
    pub async fn stack_get(&self) -> DbgpResult<Stack> {
        Stack::fetch(self).await
    }

    /// Fire a continuation command, optimistically marking the engine as
    /// running. The next status-bearing response corrects us if wrong.
    async fn continuation(&self, command: &str) -> DbgpResult<()> {
        self.shared.set_status(EngineStatus::Running);
        self.link.fire(command, MessageArguments::new(), None).await
    }

    fn require_supported(&self, command: &str) -> DbgpResult<()> {
        if self.supported.get(command).copied().unwrap_or(false) {
            Ok(())
        } else {
            Err(DbgpError::UnsupportedFeature(format!(
                "the {} command is not supported by the debugging engine",
                command
            )))
        }
    }

    pub(crate) fn link(&self) -> &Link {
        &self.link
    }
}

/// Sequential command traffic on the not-yet-split stream, used only
/// between the init packet and the pump start.
struct Handshake<'a> {
    stream: &'a mut TcpStream,
    link: &'a Link,
    shared: &'a Shared,
    event_tx: &'a mpsc::Sender<ConnectionEvent>,
}

impl Handshake<'_> {
    async fn send(
        &mut self,
        command: &str,
        args: MessageArguments,
        data: Option<&[u8]>,
    ) -> DbgpResult<u32> {
        let txid = self.link.next_txid();
        let bytes = encode_command(command, args, txid, data);
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(txid)
    }

    /// Send one command and loop until its response arrives. Interleaved
    /// messages are fully processed through the unsolicited path first.
    async fn send_wait(&mut self, command: &str, args: MessageArguments) -> DbgpResult<Element> {
        let txid = self.send(command, args, None).await?;
        let txid = txid.to_string();

        loop {
            let mut root = read_message(self.stream).await?;
            decode_encoded_content(&mut root);

            if root.name == "response" && root.attr_or("transaction_id", "") == txid {
                dispatch_unsolicited(&root, self.shared, self.event_tx)?;
                return Ok(root);
            }

            if let Err(e) = dispatch_unsolicited(&root, self.shared, self.event_tx) {
                warn!("error handling message while awaiting response: {}", e);
            }
        }
    }

    async fn feature_get(&mut self, name: &str) -> DbgpResult<String> {
        let args = MessageArguments::new().append_with("-n", name);
        let root = self.send_wait("feature_get", args).await?;
        parse_feature_get(&root, name)
    }

    async fn feature_set(&mut self, name: &str, value: &str) -> DbgpResult<bool> {
        let args = MessageArguments::new()
            .append_with("-n", name)
            .append_with("-v", value);
        let root = self.send_wait("feature_set", args).await?;
        Ok(parse_feature_set(&root))
    }

    /// Probe one extended command via feature_get. Any failure counts as
    /// unsupported.
    async fn test_command(&mut self, command: &str) -> bool {
        match self.feature_get(command).await {
            Ok(value) => value == "1",
            Err(e) => {
                debug!("error probing command '{}': {}", command, e);
                false
            }
        }
    }

    async fn negotiate_features(
        &mut self,
        supported: &mut HashMap<String, bool>,
    ) -> DbgpResult<()> {
        // Try to switch the wire encoding to UTF-8; engines that refuse
        // keep their default single-byte encoding and that is fine.
        match self.feature_set("encoding", "UTF-8").await {
            Ok(true) => debug!("encoding switched to UTF-8"),
            Ok(false) => debug!("encoding remains the engine default"),
            Err(e) => debug!("error setting encoding: {}", e),
        }

        for command in ["break", "detach", "exec", "expr"] {
            let ok = self.test_command(command).await;
            supported.insert(command.to_string(), ok);
        }

        // Fetch deep and wide structures in one round trip rather than
        // paginating.
        for (name, value) in [("max_children", "1000"), ("max_depth", "100")] {
            if let Err(e) = self.feature_set(name, value).await {
                error!("error setting {}: {}", name, e);
            }
        }

        Ok(())
    }

    /// Ask the engine to copy stdout and stderr to us. Best effort: a
    /// connection without output redirection is still usable. Responses
    /// arrive later and are dropped by the pump.
    async fn copy_output(&mut self) {
        let args = MessageArguments::new().append_with("-c", "1");
        for command in ["stdout", "stderr"] {
            if let Err(e) = self.send(command, args.clone(), None).await {
                warn!("error enabling {} copy: {}", command, e);
            }
        }
    }

    async fn typemap_get(&mut self) -> DbgpResult<Typemap> {
        let root = self.send_wait("typemap_get", MessageArguments::new()).await?;
        Ok(parse_typemap(&root))
    }
}

fn parse_init(root: &Element) -> InitPacket {
    InitPacket {
        appid: root.attr_or("appid", "").to_string(),
        idekey: root.attr_or("idekey", "").to_string(),
        session: root.attr_or("session", "").to_string(),
        thread: root.attr_or("thread", "").to_string(),
        parent: root.attr_or("parent", "").to_string(),
        language: root.attr_or("language", "").to_string(),
        protocol_version: root.attr_or("protocol_version", "").to_string(),
        fileuri: root.attr_or("fileuri", "").to_string(),
    }
}

fn parse_feature_get(root: &Element, name: &str) -> DbgpResult<String> {
    if root.attr_or("supported", "0") == "0" {
        return Err(DbgpError::UnsupportedFeature(name.to_string()));
    }
    Ok(root.text.clone())
}

fn parse_feature_set(root: &Element) -> bool {
    root.attr_or("success", "0") == "1"
}

fn parse_typemap(root: &Element) -> Typemap {
    let mut typemap = Typemap::new();
    for map in root.children_named("map") {
        typemap.add(Type::new(
            CommonType::from_str(map.attr_or("type", "")),
            map.attr_or("name", ""),
            map.attr_or("xsi:type", ""),
        ));
    }
    typemap
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_conversions() {
        for status in [
            EngineStatus::Starting,
            EngineStatus::Stopping,
            EngineStatus::Stopped,
            EngineStatus::Running,
            EngineStatus::Break,
        ] {
            assert_eq!(EngineStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(matches!(
            EngineStatus::from_str("limbo"),
            Err(DbgpError::NotFound(_))
        ));
    }

    #[test]
    fn test_parse_init() {
        let doc = br#"<init appid="php" idekey="IDE" session="s1" thread="1" parent="" language="PHP" protocol_version="1.0" fileuri="file:///srv/index.php"/>"#;
        let root = Element::parse(doc).unwrap();
        let init = parse_init(&root);
        assert_eq!(init.appid, "php");
        assert_eq!(init.idekey, "IDE");
        assert_eq!(init.language, "PHP");
        assert_eq!(init.fileuri, "file:///srv/index.php");
    }

    #[test]
    fn test_parse_feature_get() {
        let root = Element::parse(br#"<response supported="1">utf-8</response>"#).unwrap();
        assert_eq!(parse_feature_get(&root, "encoding").unwrap(), "utf-8");

        let root = Element::parse(br#"<response supported="0"/>"#).unwrap();
        assert!(matches!(
            parse_feature_get(&root, "encoding"),
            Err(DbgpError::UnsupportedFeature(_))
        ));

        // Missing supported attribute counts as unsupported.
        let root = Element::parse(br#"<response/>"#).unwrap();
        assert!(parse_feature_get(&root, "encoding").is_err());
    }

    #[test]
    fn test_parse_feature_set() {
        let root = Element::parse(br#"<response success="1"/>"#).unwrap();
        assert!(parse_feature_set(&root));
        let root = Element::parse(br#"<response success="0"/>"#).unwrap();
        assert!(!parse_feature_set(&root));
        let root = Element::parse(br#"<response/>"#).unwrap();
        assert!(!parse_feature_set(&root));
    }

    #[test]
    fn test_parse_typemap() {
        let doc = br#"<response command="typemap_get" transaction_id="1">
            <map type="bool" name="bool" xsi:type="xsd:boolean"/>
            <map type="string" name="string" xsi:type="xsd:string"/>
            <map type="null" name="null"/>
        </response>"#;
        let root = Element::parse(doc).unwrap();
        let typemap = parse_typemap(&root);
        assert_eq!(typemap.len(), 3);
        assert_eq!(typemap.get("bool").unwrap().common, CommonType::Bool);
        assert_eq!(typemap.get("bool").unwrap().xsi_type, "xsd:boolean");
        assert_eq!(typemap.get("null").unwrap().common, CommonType::Null);
    }
}
