use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use emu_core::{EventQueue, Frame, FrameSlot, HostEvent};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::RfbConfig;
use crate::protocol::{
    self, ClientMessage, ENCODING_DESKTOP_SIZE, ENCODING_RAW, PixelFormat, ProtocolError, Result,
    SECURITY_NONE, VERSION_3_8, Version,
};

/// How long an incremental update request waits for a new frame before
/// the current one is re-served.
const UPDATE_WAIT: Duration = Duration::from_millis(100);
const FRAME_POLL: Duration = Duration::from_millis(5);

/// Requests the reader half passes to the writer half, in arrival order.
const CONTROL_QUEUE: usize = 16;

pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, close every session and wait for them to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Shared {
    name: String,
    frames: Arc<FrameSlot>,
    events: Arc<EventQueue<HostEvent>>,
}

/// Bind the listener and serve clients until the handle is shut down.
pub async fn start_server(
    config: RfbConfig,
    frames: Arc<FrameSlot>,
    events: Arc<EventQueue<HostEvent>>,
) -> std::io::Result<ServerHandle> {
    let listener = TcpListener::bind(config.bind).await?;
    let addr = listener.local_addr()?;
    info!(%addr, "RFB server listening");

    let shared = Arc::new(Shared {
        name: config.name,
        frames,
        events,
    });

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let shared = Arc::clone(&shared);
                        sessions.spawn(serve_client(stream, peer, shared));
                    }
                    Err(e) => warn!("RFB accept failed: {e}"),
                },
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }
        sessions.shutdown().await;
    });

    Ok(ServerHandle {
        addr,
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

async fn serve_client(stream: TcpStream, peer: SocketAddr, shared: Arc<Shared>) {
    info!(%peer, "RFB client connected");
    match run_session(stream, &shared).await {
        Ok(()) => {}
        Err(e) => debug!(%peer, "RFB session ended: {e}"),
    }
    info!(%peer, "RFB client disconnected");
}

enum Control {
    PixelFormat(PixelFormat),
    Encodings(Vec<i32>),
    Update { incremental: bool },
}

async fn run_session(stream: TcpStream, shared: &Shared) -> Result<()> {
    let _ = stream.set_nodelay(true);
    let (mut reader, writer) = stream.into_split();
    let mut writer = BufWriter::new(writer);

    let version = handshake(&mut reader, &mut writer).await?;
    let mut shared_flag = [0u8; 1];
    reader.read_exact(&mut shared_flag).await?;

    let frame = shared.frames.latest();
    writer
        .write_all(&protocol::server_init(
            clamp_u16(frame.width),
            clamp_u16(frame.height),
            &PixelFormat::NATIVE,
            &shared.name,
        ))
        .await?;
    writer.flush().await?;
    debug!(?version, "RFB handshake complete");

    let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);
    tokio::try_join!(
        read_loop(reader, control_tx, &shared.events),
        write_loop(writer, control_rx, &shared.frames, frame.width, frame.height),
    )?;
    Ok(())
}

async fn handshake<R, W>(reader: &mut R, writer: &mut W) -> Result<Version>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.write_all(VERSION_3_8).await?;
    writer.flush().await?;
    let mut message = [0u8; 12];
    reader.read_exact(&mut message).await?;
    let version = Version::parse(&message)?;

    if version == Version::V3_3 {
        writer.write_all(&u32::from(SECURITY_NONE).to_be_bytes()).await?;
        writer.flush().await?;
        return Ok(version);
    }

    writer.write_all(&[1, SECURITY_NONE]).await?;
    writer.flush().await?;
    let mut chosen = [0u8; 1];
    reader.read_exact(&mut chosen).await?;
    if chosen[0] != SECURITY_NONE {
        if version == Version::V3_8 {
            let reason = b"unsupported security type";
            writer.write_all(&1u32.to_be_bytes()).await?;
            writer.write_all(&(reason.len() as u32).to_be_bytes()).await?;
            writer.write_all(reason).await?;
            writer.flush().await?;
        }
        return Err(ProtocolError::Security(chosen[0]));
    }
    if version == Version::V3_8 {
        writer.write_all(&0u32.to_be_bytes()).await?;
        writer.flush().await?;
    }
    Ok(version)
}

async fn read_loop<R>(
    mut reader: R,
    control: mpsc::Sender<Control>,
    events: &EventQueue<HostEvent>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    while let Some(message) = ClientMessage::read(&mut reader).await? {
        let request = match message {
            ClientMessage::SetPixelFormat(format) => {
                format.validate()?;
                Control::PixelFormat(format)
            }
            ClientMessage::SetEncodings(encodings) => Control::Encodings(encodings),
            ClientMessage::FramebufferUpdateRequest { incremental, .. } => {
                Control::Update { incremental }
            }
            ClientMessage::KeyEvent { down, keysym } => {
                events.push(HostEvent::Key {
                    keysym,
                    pressed: down,
                });
                continue;
            }
            ClientMessage::PointerEvent { buttons, x, y } => {
                events.push(HostEvent::Pointer { x, y, buttons });
                continue;
            }
            ClientMessage::CutText => continue,
        };
        if control.send(request).await.is_err() {
            break;
        }
    }
    Ok(())
}

async fn write_loop<W>(
    mut writer: W,
    mut control: mpsc::Receiver<Control>,
    frames: &FrameSlot,
    mut width: u32,
    mut height: u32,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut format = PixelFormat::NATIVE;
    let mut desktop_size = false;
    let mut served = 0;
    let mut buffer = Vec::new();

    while let Some(request) = control.recv().await {
        match request {
            Control::PixelFormat(new) => format = new,
            Control::Encodings(encodings) => {
                desktop_size = encodings.contains(&ENCODING_DESKTOP_SIZE);
            }
            Control::Update { incremental } => {
                if incremental {
                    wait_for_frame(frames, served).await;
                }
                let frame = frames.latest();
                served = frame.generation;

                let resized = frame.width != width || frame.height != height;
                if resized && desktop_size {
                    width = frame.width;
                    height = frame.height;
                }
                buffer.clear();
                encode_update(&frame, &format, resized && desktop_size, &mut buffer);
                writer.write_all(&buffer).await?;
                writer.flush().await?;
            }
        }
    }
    Ok(())
}

async fn wait_for_frame(frames: &FrameSlot, served: u64) {
    let deadline = tokio::time::Instant::now() + UPDATE_WAIT;
    while frames.generation() <= served && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(FRAME_POLL).await;
    }
}

/// One Raw rectangle for the whole frame, preceded by a desktop size
/// change when `resize` is set.
fn encode_update(frame: &Frame, format: &PixelFormat, resize: bool, out: &mut Vec<u8>) {
    let width = clamp_u16(frame.width);
    let height = clamp_u16(frame.height);
    out.reserve(16 + frame.pixels.len() * format.bytes_per_pixel());

    protocol::update_header(1 + u16::from(resize), out);
    if resize {
        protocol::rect_header(0, 0, width, height, ENCODING_DESKTOP_SIZE, out);
    }
    protocol::rect_header(0, 0, width, height, ENCODING_RAW, out);
    let row_len = frame.width as usize;
    for row in frame.pixels.chunks(row_len.max(1)).take(usize::from(height)) {
        for &pixel in &row[..usize::from(width).min(row.len())] {
            format.push_pixel(pixel, out);
        }
    }
}

fn clamp_u16(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_is_one_raw_rectangle() {
        let mut frame = Frame::blank(2, 1);
        frame.pixels = vec![0x0011_2233, 0x0044_5566];
        let mut out = Vec::new();
        encode_update(&frame, &PixelFormat::NATIVE, false, &mut out);

        assert_eq!(&out[..4], &[0, 0, 0, 1]);
        assert_eq!(&out[4..16], &[0, 0, 0, 0, 0, 2, 0, 1, 0, 0, 0, 0]);
        assert_eq!(&out[16..], &[0x33, 0x22, 0x11, 0, 0x66, 0x55, 0x44, 0]);
    }

    #[test]
    fn resize_adds_desktop_size_rectangle() {
        let frame = Frame::blank(4, 3);
        let mut out = Vec::new();
        encode_update(&frame, &PixelFormat::NATIVE, true, &mut out);

        assert_eq!(&out[2..4], &[0, 2]);
        assert_eq!(&out[4..16], &[0, 0, 0, 0, 0, 4, 0, 3, 0xFF, 0xFF, 0xFF, 0x21]);
        assert_eq!(out.len(), 4 + 12 + 12 + 4 * 3 * 4);
    }
}
