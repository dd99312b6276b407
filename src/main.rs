// Copyright 2023, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! NFCC and RF emulator: a TCP-framed NCI transport on one port and a
//! line-oriented operator console on a second port, both driving a single
//! in-process `Controller` instance.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use anyhow::Result;
use argh::FromArgs;
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{tcp, TcpListener, TcpStream};
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::time;

use bcm2079x_emu::console;
use bcm2079x_emu::controller::Controller;
use bcm2079x_emu::packets::nci;
use bcm2079x_emu::re;

/// Read NCI Control and Data packets received on the NCI transport,
/// reassembling segmented packets.
struct NciReader {
    socket: tcp::OwnedReadHalf,
}

/// Write NCI Control and Data packets to the NCI transport, segmenting
/// payloads over 255 bytes.
struct NciWriter {
    socket: tcp::OwnedWriteHalf,
}

impl NciReader {
    fn new(socket: tcp::OwnedReadHalf) -> Self {
        NciReader { socket }
    }

    /// Read a single NCI packet, transparently re-assembling segments. Per
    /// NCI §4.4.1 every segment of one message shares MT/GID/OID (or MT/Conn
    /// ID for data), so the header we hand back is the first segment's with
    /// the PBF bit cleared and the payload length field corrected to the
    /// full reassembled length.
    async fn read(&mut self) -> Result<Vec<u8>> {
        const HEADER_SIZE: usize = 3;
        let mut first_header = [0u8; HEADER_SIZE];
        let mut payload = Vec::new();
        let mut header = [0u8; HEADER_SIZE];
        let mut first = true;
        loop {
            self.socket.read_exact(&mut header).await?;
            if first {
                first_header = header;
                first = false;
            }
            let segment_len = header[2] as usize;
            let mut segment = vec![0u8; segment_len];
            self.socket.read_exact(&mut segment).await?;
            payload.extend_from_slice(&segment);
            let incomplete = header[0] & 0x10 != 0;
            if !incomplete {
                break;
            }
        }
        if payload.len() > u8::MAX as usize {
            return Err(anyhow::anyhow!("reassembled NCI packet exceeds 255 bytes"));
        }
        let mut complete_packet = Vec::with_capacity(HEADER_SIZE + payload.len());
        complete_packet.push(first_header[0] & !0x10);
        complete_packet.push(first_header[1]);
        complete_packet.push(payload.len() as u8);
        complete_packet.extend(payload);
        Ok(complete_packet)
    }
}

impl NciWriter {
    fn new(socket: tcp::OwnedWriteHalf) -> Self {
        NciWriter { socket }
    }

    /// Write a single NCI packet, segmenting the payload if it exceeds 255
    /// bytes per segment.
    async fn write(&mut self, mut packet: &[u8]) -> Result<()> {
        let mut header_bytes = [packet[0], packet[1], 0];
        packet = &packet[3..];

        loop {
            let chunk_length = std::cmp::min(255, packet.len());
            let incomplete = chunk_length < packet.len();
            const PBF_MASK: u8 = 0x10;
            header_bytes[0] &= !PBF_MASK;
            if incomplete {
                header_bytes[0] |= PBF_MASK;
            }
            header_bytes[2] = chunk_length as u8;

            self.socket.write_all(&header_bytes).await?;
            self.socket.write_all(&packet[..chunk_length]).await?;
            packet = &packet[chunk_length..];

            if packet.is_empty() {
                return Ok(());
            }
        }
    }
}

/// One parsed console line in flight, paired with a channel to deliver the
/// text reply back to the connection that sent it.
struct ConsoleRequest {
    line: String,
    reply_tx: oneshot::Sender<String>,
}

async fn accept_console_connections(listener: TcpListener, tx: mpsc::Sender<ConsoleRequest>) {
    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                info!("console client connected from {addr}");
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_console_conn(socket, tx).await {
                        debug!("console connection from {addr} closed: {e}");
                    }
                });
            }
            Err(e) => warn!("console accept failed: {e}"),
        }
    }
}

async fn handle_console_conn(socket: TcpStream, tx: mpsc::Sender<ConsoleRequest>) -> Result<()> {
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(());
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            continue;
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        if tx.send(ConsoleRequest { line: trimmed.to_string(), reply_tx }).await.is_err() {
            return Ok(());
        }
        let reply = reply_rx.await.unwrap_or_else(|_| "KO: controller gone\r\n".to_string());
        write_half.write_all(reply.as_bytes()).await?;
    }
}

/// The controller owns all mutable state; this loop is the single place
/// that touches it, so the three entry points (NCI read, console command,
/// xmit timer) never run concurrently for one controller instance.
async fn run_device(
    mut controller: Controller,
    mut nci_reader: NciReader,
    mut nci_writer: NciWriter,
    mut console_rx: mpsc::Receiver<ConsoleRequest>,
) -> Result<()> {
    nci_writer.write(&controller.core_reset_ntf()).await?;
    let mut xmit_ticker = time::interval(Duration::from_millis(re::XMIT_TIMER_MS));
    xmit_ticker.tick().await; // first tick fires immediately; consume it.

    loop {
        select! {
            result = nci_reader.read() => {
                let packet = result?;
                let (header, _) = nci::decode(&packet)?;
                match header.mt {
                    nci::MsgType::Command => {
                        let (rsp, ntf) = controller.handle_command(&packet)?;
                        nci_writer.write(&rsp).await?;
                        if let Some(ntf) = ntf {
                            nci_writer.write(&ntf).await?;
                        }
                    }
                    nci::MsgType::Data => {
                        if let Some(reply) = controller.handle_data(&packet)? {
                            nci_writer.write(&reply).await?;
                        }
                    }
                    other => warn!("unexpected NCI message type {other:?} from host"),
                }
            }
            Some(req) = console_rx.recv() => {
                let reply = console::handle_line(&req.line, &mut controller);
                for bytes in &reply.emitted {
                    nci_writer.write(bytes).await?;
                }
                let _ = req.reply_tx.send(reply.text);
            }
            _ = xmit_ticker.tick() => {
                for re in controller.res.iter_mut() {
                    if !re.xmit_timer_armed {
                        continue;
                    }
                    let pdu = re.tick();
                    let conn_id = re.connid.unwrap_or(0);
                    let wrapped = nci::encode_data(nci::Pbf::CompleteOrFinal, conn_id, &pdu)?;
                    nci_writer.write(&wrapped).await?;
                }
            }
        }
    }
}

#[derive(FromArgs, Debug)]
/// BCM2079x-class NFC controller emulator.
struct Opt {
    #[argh(option, default = "7000")]
    /// TCP port for the NCI transport.
    nci_port: u16,

    #[argh(option, default = "7001")]
    /// TCP port for the operator console.
    console_port: u16,

    #[argh(option, default = "String::from(\"info\")")]
    /// log level passed through to env_logger (error/warn/info/debug/trace).
    log_level: String,
}

async fn run() -> Result<()> {
    let opt: Opt = argh::from_env();
    env_logger::Builder::new().parse_filters(&opt.log_level).init();

    let nci_address = SocketAddrV4::new(Ipv4Addr::LOCALHOST, opt.nci_port);
    let console_address = SocketAddrV4::new(Ipv4Addr::LOCALHOST, opt.console_port);
    let nci_listener = TcpListener::bind(nci_address).await?;
    let console_listener = TcpListener::bind(console_address).await?;
    info!("NCI transport listening on 127.0.0.1:{}", opt.nci_port);
    info!("operator console listening on 127.0.0.1:{}", opt.console_port);

    let (console_tx, console_rx) = mpsc::channel(8);
    tokio::spawn(accept_console_connections(console_listener, console_tx));

    let (socket, addr) = nci_listener.accept().await?;
    info!("NCI host connected from {addr}");
    let (nci_rx, nci_tx) = socket.into_split();
    run_device(Controller::new(), NciReader::new(nci_rx), NciWriter::new(nci_tx), console_rx).await
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}
