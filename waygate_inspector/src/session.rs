use color_eyre::eyre::{bail, eyre};
use color_eyre::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;
use waygate_proto::codec::{decode_server, encode_client, MAX_FRAME_LEN};
use waygate_proto::{ClientMessage, PlayerId, ServerMessage};

/// One handshaken connection to the portal server.
pub struct Session {
    stream: TcpStream,
}

impl Session {
    pub async fn open(endpoint: &str, player: PlayerId) -> Result<Self> {
        let stream = TcpStream::connect(endpoint).await?;
        stream.set_nodelay(true)?;
        let mut session = Self { stream };
        session.send(&ClientMessage::Hello { player }).await?;
        Ok(session)
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let payload = encode_client(message)?;
        let len = u32::try_from(payload.len()).map_err(|_| eyre!("client frame too large"))?;
        self.stream.write_all(&len.to_le_bytes()).await?;
        self.stream.write_all(&payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<ServerMessage> {
        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf).await?;
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            bail!("server frame of {len} bytes exceeds the frame size limit");
        }
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await?;
        let message = decode_server(&payload)?;
        trace!(kind = message.kind(), len, "frame.received");
        Ok(message)
    }
}
