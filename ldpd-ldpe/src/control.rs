//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use ldpd_utils::Sender;
use ldpd_utils::task::Task;

use crate::tasks::messages::input::ControlMsg;

// Maximum accepted control frame size.
const MAX_FRAME_SIZE: u32 = 1 << 20;

// Control socket listener task.
//
// The control socket lives in the LDP engine. Frames are 4-byte length
// prefixed JSON messages of the shared control enumeration; every connected
// client is registered with the main task, which routes streamed replies
// back through a per-client channel.
pub(crate) fn listener(controlp: &Sender<ControlMsg>) -> Task<()> {
    #[cfg(not(feature = "testing"))]
    {
        let controlp = controlp.clone();
        Task::spawn(async move {
            if let Err(error) = real::listen_loop(controlp).await {
                crate::error::IoError::ControlSocketError(error).log();
            }
        })
    }
    #[cfg(feature = "testing")]
    {
        Task::spawn(async move { std::future::pending().await })
    }
}

#[cfg(not(feature = "testing"))]
mod real {
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Arc;

    use ldpd_utils::Sender;
    use ldpd_utils::ibus::CtlMsg;
    use ldpd_utils::config::LDPD_SOCKET;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{UnixListener, UnixStream};
    use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::sync::Notify;
    use tokio::sync::mpsc;

    use super::MAX_FRAME_SIZE;
    use crate::error::IoError;
    use crate::tasks::messages::input::ControlMsg;

    pub(super) async fn listen_loop(
        controlp: Sender<ControlMsg>,
    ) -> std::io::Result<()> {
        // Bind the control socket, replacing any stale one, and restrict
        // its permissions to the owner.
        let _ = std::fs::remove_file(LDPD_SOCKET);
        let listener = UnixListener::bind(LDPD_SOCKET)?;
        std::fs::set_permissions(
            LDPD_SOCKET,
            std::fs::Permissions::from_mode(0o600),
        )?;

        let close_notify = Arc::new(Notify::new());
        let mut next_client_id: u64 = 0;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    next_client_id += 1;
                    let client_id = next_client_id;
                    let controlp = controlp.clone();
                    let close_notify = close_notify.clone();
                    tokio::spawn(async move {
                        client_loop(stream, client_id, controlp).await;
                        // Wake up the accept loop in case it ran out of
                        // file descriptors.
                        close_notify.notify_one();
                    });
                }
                Err(error)
                    if error.raw_os_error() == Some(libc::EMFILE)
                        || error.raw_os_error() == Some(libc::ENFILE) =>
                {
                    // Out of file descriptors: pause accepting new clients
                    // until an existing connection closes.
                    IoError::ControlSocketError(error).log();
                    close_notify.notified().await;
                }
                Err(error) => {
                    IoError::ControlSocketError(error).log();
                }
            }
        }
    }

    async fn client_loop(
        stream: UnixStream,
        client_id: u64,
        controlp: Sender<ControlMsg>,
    ) {
        let (mut read_half, mut write_half) = stream.into_split();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();

        if controlp
            .send(ControlMsg::Connected {
                client_id,
                replies: reply_tx,
            })
            .await
            .is_err()
        {
            return;
        }

        loop {
            tokio::select! {
                frame = read_frame(&mut read_half) => {
                    match frame {
                        Ok(Some(msg)) => {
                            let msg = ControlMsg::Request { client_id, msg };
                            if controlp.send(msg).await.is_err() {
                                break;
                            }
                        }
                        _ => break,
                    }
                }
                msg = reply_rx.recv() => {
                    match msg {
                        Some(msg) => {
                            if write_frame(&mut write_half, &msg)
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        let _ = controlp.send(ControlMsg::Disconnected { client_id }).await;
    }

    async fn read_frame(
        read_half: &mut OwnedReadHalf,
    ) -> std::io::Result<Option<CtlMsg>> {
        let mut len_buf = [0u8; 4];
        if read_half.read_exact(&mut len_buf).await.is_err() {
            // Peer closed the connection.
            return Ok(None);
        }
        let len = u32::from_be_bytes(len_buf);
        if len == 0 || len > MAX_FRAME_SIZE {
            return Ok(None);
        }

        let mut payload = vec![0u8; len as usize];
        read_half.read_exact(&mut payload).await?;

        match serde_json::from_slice(&payload) {
            Ok(msg) => Ok(Some(msg)),
            Err(_) => Ok(None),
        }
    }

    async fn write_frame(
        write_half: &mut OwnedWriteHalf,
        msg: &CtlMsg,
    ) -> std::io::Result<()> {
        let payload = serde_json::to_vec(msg)
            .map_err(|error| std::io::Error::other(error))?;
        let len = payload.len() as u32;
        write_half.write_all(&len.to_be_bytes()).await?;
        write_half.write_all(&payload).await?;
        Ok(())
    }
}
