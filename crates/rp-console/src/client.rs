//! Thin protocol client for the operator console
//!
//! The console is an ordinary session: it receives an identity and token on
//! connect, echoes the token back, and then drives the operator commands.

use anyhow::{bail, Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use rp_protocol::{ClientId, Command, LineCodec, Reply};

/// One authenticated console connection
pub struct ConsoleClient {
    framed: Framed<TcpStream, LineCodec>,
    /// The identity the server assigned to this console session
    pub session_id: ClientId,
}

impl ConsoleClient {
    /// Connect, complete the handshake and authenticate.
    pub async fn connect(address: &str) -> Result<Self> {
        let stream = TcpStream::connect(address)
            .await
            .with_context(|| format!("Failed to connect to {}", address))?;
        let mut framed = Framed::new(stream, LineCodec::new());

        let mut session_id = None;
        let mut token = None;
        for _ in 0..4 {
            if session_id.is_some() && token.is_some() {
                break;
            }
            match framed.next().await {
                None => bail!("Server closed the connection during handshake"),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(line)) => match Reply::parse(&line) {
                    Ok(Reply::ClientId(id)) => session_id = Some(id),
                    Ok(Reply::AuthToken(t)) => token = Some(t),
                    _ => tracing::debug!("Unexpected handshake line: {:?}", line),
                },
            }
        }

        let session_id = session_id.context("Handshake did not include CLIENT_ID")?;
        let token = token.context("Handshake did not include AUTH_TOKEN")?;

        let mut client = Self { framed, session_id };
        match client.request(Command::Auth { token }).await? {
            Reply::AuthSuccess => Ok(client),
            Reply::AuthFail => bail!("Server rejected the issued token"),
            other => bail!("Unexpected authentication reply: {}", other),
        }
    }

    /// Send one command and return its direct reply.
    ///
    /// Relayed `CMD` pushes from other operators' broadcasts may interleave;
    /// they are skipped.
    pub async fn request(&mut self, command: Command) -> Result<Reply> {
        self.framed.send(command.to_string()).await?;

        loop {
            match self.framed.next().await {
                None => bail!("Server closed the connection"),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match Reply::parse(&line) {
                        Ok(Reply::Cmd(_)) => continue,
                        Ok(reply) => return Ok(reply),
                        Err(e) => bail!("Unexpected server line {:?}: {}", line, e),
                    }
                }
            }
        }
    }

    /// Announce `EXIT` and wait for the goodbye.
    pub async fn close(mut self) -> Result<()> {
        match self.request(Command::Exit).await? {
            Reply::Goodbye => Ok(()),
            other => bail!("Unexpected reply to EXIT: {}", other),
        }
    }
}
