// DBGp wire codec
//
// Commands: "<command> <flags...> -i <txid>[ -- <base64-data>]" + NUL.
// Responses: ASCII decimal length, NUL, that many bytes of XML, NUL.
//
// Reference: https://xdebug.org/docs/dbgp

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::arguments::MessageArguments;
use crate::error::{DbgpError, DbgpResult};
use crate::xml::Element;

/// Encode one command for the wire.
///
/// The transaction id travels as the `-i` flag; a payload, if present, is
/// base64-wrapped after the `--` separator.
pub fn encode_command(
    command: &str,
    args: MessageArguments,
    txid: u32,
    data: Option<&[u8]>,
) -> Vec<u8> {
    let args = args.append_with("-i", &txid.to_string());

    let mut buf = BytesMut::new();
    buf.put_slice(command.as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(args.render().as_bytes());
    if let Some(data) = data {
        if !data.is_empty() {
            buf.put_slice(b" -- ");
            buf.put_slice(crate::base64::encode(data).as_bytes());
        }
    }
    buf.put_u8(0);
    buf.to_vec()
}

/// Read one framed message off the socket and parse it as XML.
///
/// Blocks until a full message is available. The length prefix is read one
/// byte at a time up to its NUL terminator, then exactly that many bytes of
/// document plus the trailing NUL.
pub async fn read_message<R>(reader: &mut R) -> DbgpResult<Element>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = Vec::new();
    loop {
        let byte = reader.read_u8().await?;
        if byte == 0 {
            break;
        }
        len_buf.push(byte);
    }

    let length: usize = std::str::from_utf8(&len_buf)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| DbgpError::Socket("invalid message length prefix".into()))?;
    if length == 0 {
        return Err(DbgpError::Socket("told to read 0 bytes".into()));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    // Trailing NUL terminator.
    reader.read_u8().await?;

    trace!("RX({}): {}", length, String::from_utf8_lossy(&body));

    Element::parse(&body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(xml: &str) -> Vec<u8> {
        let mut out = xml.len().to_string().into_bytes();
        out.push(0);
        out.extend_from_slice(xml.as_bytes());
        out.push(0);
        out
    }

    #[test]
    fn test_encode_command_layout() {
        let args = MessageArguments::new().append_with("-n", "encoding");
        let encoded = encode_command("feature_get", args, 7, None);
        assert_eq!(encoded, b"feature_get -i \"7\" -n \"encoding\"\0".to_vec());
    }

    #[test]
    fn test_encode_command_with_payload() {
        let encoded = encode_command("breakpoint_set", MessageArguments::new(), 3, Some(b"x > 1"));
        let text = String::from_utf8(encoded[..encoded.len() - 1].to_vec()).unwrap();
        assert_eq!(
            text,
            format!("breakpoint_set -i \"3\" -- {}", crate::base64::encode(b"x > 1"))
        );
        assert_eq!(*encoded.last().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_message() {
        let data = frame(r#"<response command="run" transaction_id="1" status="break"/>"#);
        let mut reader = &data[..];
        let root = read_message(&mut reader).await.unwrap();
        assert_eq!(root.name, "response");
        assert_eq!(root.attr("status"), Some("break"));
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_read_message_back_to_back() {
        let mut data = frame("<init appid=\"php\"/>");
        data.extend(frame("<stream type=\"stdout\">hi</stream>"));
        let mut reader = &data[..];
        assert_eq!(read_message(&mut reader).await.unwrap().name, "init");
        assert_eq!(read_message(&mut reader).await.unwrap().name, "stream");
    }

    #[tokio::test]
    async fn test_read_message_zero_length() {
        let data = b"0\0\0".to_vec();
        let mut reader = &data[..];
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, DbgpError::Socket(_)));
    }

    #[tokio::test]
    async fn test_read_message_short_read() {
        let data = b"100\0<response/>".to_vec();
        let mut reader = &data[..];
        assert!(matches!(
            read_message(&mut reader).await.unwrap_err(),
            DbgpError::Io(_)
        ));
    }

    #[tokio::test]
    async fn test_read_message_malformed_document() {
        let data = frame("<response><broken></response>");
        let mut reader = &data[..];
        assert!(matches!(
            read_message(&mut reader).await.unwrap_err(),
            DbgpError::MalformedDocument(_)
        ));
    }
}
