//! Helpers for the protocol-significant plugin channels.
//!
//! `REGISTER` / `UNREGISTER` payloads are NUL-separated UTF-8 channel names.
//! The brand channel carries a single VarInt length-prefixed UTF-8 string.

use bytes::Bytes;

use crate::packets::PluginMessage;

/// Channel the client uses to announce the channels it listens on.
pub const REGISTER_CHANNEL: &str = "REGISTER";
/// Channel the client uses to withdraw channels.
pub const UNREGISTER_CHANNEL: &str = "UNREGISTER";
/// Legacy brand channel.
pub const BRAND_CHANNEL: &str = "MC|Brand";
/// Namespaced brand channel.
pub const BRAND_CHANNEL_NAMESPACED: &str = "minecraft:brand";

/// Errors raised while reading a channel list.
#[derive(Debug, thiserror::Error)]
pub enum ChannelListError {
    /// The payload is not valid UTF-8.
    #[error("channel list is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Whether `channel` carries the client brand.
pub fn is_brand_channel(channel: &str) -> bool {
    channel == BRAND_CHANNEL || channel == BRAND_CHANNEL_NAMESPACED
}

/// Parse the channel names listed in a REGISTER/UNREGISTER message.
pub fn channels(message: &PluginMessage) -> Result<Vec<String>, ChannelListError> {
    let text = std::str::from_utf8(&message.data)?;
    Ok(text
        .split('\0')
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect())
}

/// Build a REGISTER/UNREGISTER message listing `names`.
pub fn channels_message<I, S>(kind: &str, names: I) -> PluginMessage
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut data = Vec::new();
    for (i, name) in names.into_iter().enumerate() {
        if i > 0 {
            data.push(0);
        }
        data.extend_from_slice(name.as_ref().as_bytes());
    }
    PluginMessage {
        channel: kind.to_string(),
        data: Bytes::from(data),
    }
}

/// Rewrite a brand message so it names the proxy as well as the original
/// brand. An unreadable payload is replaced by the proxy brand alone.
pub fn rewrite_brand(message: &PluginMessage, proxy_brand: &str) -> PluginMessage {
    let brand = match read_string(&message.data) {
        Some(original) => format!("{original} ({proxy_brand})"),
        None => proxy_brand.to_string(),
    };
    let mut data = Vec::with_capacity(brand.len() + 5);
    write_string(&mut data, &brand);
    PluginMessage {
        channel: message.channel.clone(),
        data: Bytes::from(data),
    }
}

// ---------------------------------------------------------------------------
// VarInt strings
// ---------------------------------------------------------------------------

/// Read a VarInt; returns the value and the number of bytes consumed.
fn read_varint(data: &[u8]) -> Option<(i32, usize)> {
    let mut result: i32 = 0;
    for (i, byte) in data.iter().take(5).enumerate() {
        result |= ((byte & 0x7F) as i32) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
    }
    None
}

fn write_varint(out: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7F == 0 {
            out.push(value as u8);
            return;
        }
        out.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
}

/// Read a VarInt length-prefixed UTF-8 string that spans the whole buffer
/// prefix.
pub fn read_string(data: &[u8]) -> Option<String> {
    let (len, offset) = read_varint(data)?;
    let len = usize::try_from(len).ok()?;
    let bytes = data.get(offset..offset.checked_add(len)?)?;
    std::str::from_utf8(bytes).ok().map(str::to_owned)
}

/// Append a VarInt length-prefixed UTF-8 string.
pub fn write_string(out: &mut Vec<u8>, value: &str) {
    write_varint(out, value.len() as i32);
    out.extend_from_slice(value.as_bytes());
}
