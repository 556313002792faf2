//! MySQL replication wire protocol
//!
//! Minimal client for pulling a binlog stream as a replica:
//! handshake + `mysql_native_password` auth, `COM_REGISTER_SLAVE`,
//! `COM_BINLOG_DUMP`, then raw event packets.

use bytes::{BufMut, BytesMut};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::common::error::{BinlensError, Result};
use crate::common::position::LogPosition;

const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
const CLIENT_TRANSACTIONS: u32 = 0x0000_2000;
const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;

const COM_QUERY: u8 = 0x03;
const COM_BINLOG_DUMP: u8 = 0x12;
const COM_REGISTER_SLAVE: u8 = 0x15;

const NATIVE_PASSWORD_PLUGIN: &str = "mysql_native_password";
const MAX_PACKET: u32 = 16 * 1024 * 1024;
const UTF8_CHARSET: u8 = 33;

/// Server greeting, parsed from the first packet.
struct Handshake {
    server_version: String,
    capabilities: u32,
    auth_data: Vec<u8>,
    auth_plugin: String,
}

fn take<'a>(data: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8]> {
    if data.len() < *pos + n {
        return Err(BinlensError::protocol("handshake packet too short"));
    }
    let out = &data[*pos..*pos + n];
    *pos += n;
    Ok(out)
}

fn take_nul<'a>(data: &'a [u8], pos: &mut usize) -> &'a [u8] {
    let start = *pos;
    while *pos < data.len() && data[*pos] != 0 {
        *pos += 1;
    }
    let out = &data[start..*pos];
    *pos += 1; // nul
    out
}

fn parse_handshake(data: &[u8]) -> Result<Handshake> {
    let mut pos = 0usize;

    let protocol_version = take(data, &mut pos, 1)?[0];
    if protocol_version == 0xFF {
        return Err(BinlensError::protocol(format!(
            "server rejected connection: {}",
            String::from_utf8_lossy(&data[pos..])
        )));
    }
    let server_version = String::from_utf8_lossy(take_nul(data, &mut pos)).to_string();
    take(data, &mut pos, 4)?; // connection id
    let mut auth_data = take(data, &mut pos, 8)?.to_vec();
    take(data, &mut pos, 1)?; // filler
    let cap_low = u16::from_le_bytes(take(data, &mut pos, 2)?.try_into().unwrap()) as u32;

    let mut capabilities = cap_low;
    let mut auth_plugin = String::new();
    if data.len() > pos {
        take(data, &mut pos, 1)?; // charset
        take(data, &mut pos, 2)?; // status flags
        let cap_high = u16::from_le_bytes(take(data, &mut pos, 2)?.try_into().unwrap()) as u32;
        capabilities |= cap_high << 16;
        let auth_len = take(data, &mut pos, 1)?[0] as usize;
        take(data, &mut pos, 10)?; // reserved
        if capabilities & CLIENT_SECURE_CONNECTION != 0 {
            let part2_len = auth_len.saturating_sub(8).max(13);
            let part2_take = part2_len.min(data.len() - pos);
            let mut part2 = take(data, &mut pos, part2_take)?.to_vec();
            if let Some(nul) = part2.iter().position(|&b| b == 0) {
                part2.truncate(nul);
            }
            auth_data.extend_from_slice(&part2);
        }
        if capabilities & CLIENT_PLUGIN_AUTH != 0 && pos < data.len() {
            auth_plugin = String::from_utf8_lossy(take_nul(data, &mut pos)).to_string();
        }
    }

    Ok(Handshake {
        server_version,
        capabilities,
        auth_data,
        auth_plugin,
    })
}

/// `mysql_native_password` scramble:
/// `SHA1(password) XOR SHA1(salt + SHA1(SHA1(password)))`.
fn native_scramble(password: &str, salt: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let hash1 = Sha1::digest(password.as_bytes());
    let hash2 = Sha1::digest(hash1);
    let mut outer = Sha1::new();
    outer.update(&salt[..salt.len().min(20)]);
    outer.update(hash2);
    let outer = outer.finalize();
    hash1
        .iter()
        .zip(outer.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Replication protocol client.
pub struct BinlogClient {
    stream: BufReader<TcpStream>,
    sequence: u8,
    server_version: String,
}

impl std::fmt::Debug for BinlogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinlogClient")
            .field("server_version", &self.server_version)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl BinlogClient {
    /// Connect and authenticate.
    pub async fn connect(host: &str, port: u16, user: &str, password: &str) -> Result<Self> {
        let addr = format!("{host}:{port}");
        info!(%addr, "connecting to replication source");
        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|e| BinlensError::connection(format!("connect {addr}: {e}")))?;
        let mut client = Self {
            stream: BufReader::new(tcp),
            sequence: 0,
            server_version: String::new(),
        };

        let greeting = client.read_packet().await?;
        let handshake = parse_handshake(&greeting)?;
        client.server_version = handshake.server_version.clone();
        info!(server_version = %handshake.server_version, "server greeting");

        client.authenticate(user, password, &handshake).await?;
        Ok(client)
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    async fn authenticate(
        &mut self,
        user: &str,
        password: &str,
        handshake: &Handshake,
    ) -> Result<()> {
        let plugin = if handshake.auth_plugin.is_empty() {
            NATIVE_PASSWORD_PLUGIN
        } else {
            handshake.auth_plugin.as_str()
        };
        if plugin != NATIVE_PASSWORD_PLUGIN {
            // caching_sha2 would need the RSA full-auth exchange.
            return Err(BinlensError::protocol(format!(
                "server requests auth plugin {plugin}; create the replication \
                 user with mysql_native_password"
            )));
        }

        let scramble = native_scramble(password, &handshake.auth_data);
        let capabilities = CLIENT_LONG_PASSWORD
            | CLIENT_PROTOCOL_41
            | CLIENT_TRANSACTIONS
            | CLIENT_SECURE_CONNECTION
            | (handshake.capabilities & CLIENT_PLUGIN_AUTH);

        let mut payload = BytesMut::new();
        payload.put_u32_le(capabilities);
        payload.put_u32_le(MAX_PACKET);
        payload.put_u8(UTF8_CHARSET);
        payload.put_bytes(0, 23);
        payload.put_slice(user.as_bytes());
        payload.put_u8(0);
        payload.put_u8(scramble.len() as u8);
        payload.put_slice(&scramble);
        if capabilities & CLIENT_PLUGIN_AUTH != 0 {
            payload.put_slice(NATIVE_PASSWORD_PLUGIN.as_bytes());
            payload.put_u8(0);
        }
        self.write_packet(&payload).await?;

        let response = self.read_packet().await?;
        match response.first() {
            Some(0x00) => {
                debug!("authenticated");
                Ok(())
            }
            Some(0xFE) => {
                // Auth switch: only the native plugin is honored.
                let mut pos = 1usize;
                while pos < response.len() && response[pos] != 0 {
                    pos += 1;
                }
                let plugin = String::from_utf8_lossy(&response[1..pos]).to_string();
                if plugin != NATIVE_PASSWORD_PLUGIN {
                    return Err(BinlensError::protocol(format!(
                        "auth switch to unsupported plugin {plugin}"
                    )));
                }
                let salt = &response[pos + 1..];
                let scramble = native_scramble(password, salt);
                self.write_packet(&scramble).await?;
                let response = self.read_packet().await?;
                match response.first() {
                    Some(0x00) => Ok(()),
                    _ => Err(parse_err_packet(&response)),
                }
            }
            Some(0xFF) => Err(parse_err_packet(&response)),
            _ => Err(BinlensError::protocol("unexpected auth response")),
        }
    }

    /// Run a statement, expecting a bare OK (used for session variables).
    pub async fn execute(&mut self, sql: &str) -> Result<()> {
        self.sequence = 0;
        let mut payload = BytesMut::with_capacity(1 + sql.len());
        payload.put_u8(COM_QUERY);
        payload.put_slice(sql.as_bytes());
        self.write_packet(&payload).await?;
        let response = self.read_packet().await?;
        match response.first() {
            Some(0xFF) => Err(parse_err_packet(&response)),
            _ => Ok(()),
        }
    }

    /// Announce this client as a replica with the given server id.
    pub async fn register_replica(&mut self, server_id: u32, port: u16) -> Result<()> {
        self.sequence = 0;
        let mut payload = BytesMut::new();
        payload.put_u8(COM_REGISTER_SLAVE);
        payload.put_u32_le(server_id);
        payload.put_u8(0); // hostname length
        payload.put_u8(0); // user length
        payload.put_u8(0); // password length
        payload.put_u16_le(port);
        payload.put_u32_le(0); // replication rank
        payload.put_u32_le(0); // master id
        self.write_packet(&payload).await?;
        let response = self.read_packet().await?;
        match response.first() {
            Some(0x00) => {
                debug!(server_id, "registered as replica");
                Ok(())
            }
            _ => Err(parse_err_packet(&response)),
        }
    }

    /// Request the event stream from a position.
    pub async fn start_dump(&mut self, server_id: u32, from: &LogPosition) -> Result<()> {
        self.sequence = 0;
        let mut payload = BytesMut::new();
        payload.put_u8(COM_BINLOG_DUMP);
        payload.put_u32_le(from.offset as u32);
        payload.put_u16_le(0); // flags
        payload.put_u32_le(server_id);
        payload.put_slice(from.segment.as_bytes());
        self.write_packet(&payload).await?;
        info!(position = %from, "binlog dump started");
        Ok(())
    }

    /// Next raw binlog event frame, without the network OK prefix.
    /// `None` is a clean server-side end of stream.
    pub async fn next_event_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let packet = self.read_packet().await?;
        match packet.first() {
            Some(0x00) => Ok(Some(packet[1..].to_vec())),
            Some(0xFE) if packet.len() < 9 => Ok(None),
            Some(0xFF) => Err(parse_err_packet(&packet)),
            _ => Err(BinlensError::protocol("unexpected event packet prefix")),
        }
    }

    async fn read_packet(&mut self) -> Result<Vec<u8>> {
        let mut head = [0u8; 4];
        self.stream
            .read_exact(&mut head)
            .await
            .map_err(|e| BinlensError::connection(format!("read packet header: {e}")))?;
        let len = u32::from_le_bytes([head[0], head[1], head[2], 0]) as usize;
        self.sequence = head[3].wrapping_add(1);
        let mut payload = vec![0u8; len];
        self.stream
            .read_exact(&mut payload)
            .await
            .map_err(|e| BinlensError::connection(format!("read packet body: {e}")))?;
        Ok(payload)
    }

    async fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let mut frame = BytesMut::with_capacity(4 + payload.len());
        let len = payload.len() as u32;
        frame.put_u8(len as u8);
        frame.put_u8((len >> 8) as u8);
        frame.put_u8((len >> 16) as u8);
        frame.put_u8(self.sequence);
        frame.put_slice(payload);
        self.sequence = self.sequence.wrapping_add(1);
        self.stream
            .get_mut()
            .write_all(&frame)
            .await
            .map_err(|e| BinlensError::connection(format!("write packet: {e}")))?;
        self.stream
            .get_mut()
            .flush()
            .await
            .map_err(|e| BinlensError::connection(format!("flush: {e}")))?;
        Ok(())
    }
}

fn parse_err_packet(packet: &[u8]) -> BinlensError {
    if packet.first() != Some(&0xFF) || packet.len() < 3 {
        return BinlensError::protocol("malformed server response");
    }
    let code = u16::from_le_bytes([packet[1], packet[2]]);
    let mut msg_start = 3;
    // Optional '#' + 5-byte SQLSTATE marker.
    if packet.get(3) == Some(&b'#') && packet.len() >= 9 {
        msg_start = 9;
    }
    BinlensError::protocol(format!(
        "server error {code}: {}",
        String::from_utf8_lossy(&packet[msg_start..])
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_scramble_shape() {
        let salt = [7u8; 20];
        let scramble = native_scramble("secret", &salt);
        assert_eq!(scramble.len(), 20);
        // deterministic
        assert_eq!(scramble, native_scramble("secret", &salt));
        // differs per salt and per password
        assert_ne!(scramble, native_scramble("secret", &[8u8; 20]));
        assert_ne!(scramble, native_scramble("other", &salt));
        assert!(native_scramble("", &salt).is_empty());
    }

    #[test]
    fn test_parse_handshake_v10() {
        let mut data = Vec::new();
        data.push(10); // protocol version
        data.extend_from_slice(b"8.0.35\0");
        data.extend_from_slice(&99u32.to_le_bytes()); // connection id
        data.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]); // auth part 1
        data.push(0); // filler
        let caps_low = (CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION) as u16;
        data.extend_from_slice(&caps_low.to_le_bytes());
        data.push(UTF8_CHARSET);
        data.extend_from_slice(&0u16.to_le_bytes()); // status
        let caps_high = ((CLIENT_PLUGIN_AUTH) >> 16) as u16;
        data.extend_from_slice(&caps_high.to_le_bytes());
        data.push(21); // auth data length
        data.extend_from_slice(&[0u8; 10]); // reserved
        data.extend_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 0]); // part 2
        data.extend_from_slice(b"mysql_native_password\0");

        let handshake = parse_handshake(&data).unwrap();
        assert_eq!(handshake.server_version, "8.0.35");
        assert_eq!(handshake.auth_plugin, NATIVE_PASSWORD_PLUGIN);
        assert_eq!(handshake.auth_data.len(), 20);
        assert_eq!(handshake.auth_data[8], 9);
        assert!(handshake.capabilities & CLIENT_PLUGIN_AUTH != 0);
    }

    #[test]
    fn test_parse_err_packet() {
        let mut packet = vec![0xFF];
        packet.extend_from_slice(&1236u16.to_le_bytes());
        packet.extend_from_slice(b"#HY000");
        packet.extend_from_slice(b"bad position");
        let err = parse_err_packet(&packet);
        let msg = err.to_string();
        assert!(msg.contains("1236"));
        assert!(msg.contains("bad position"));
    }
}
