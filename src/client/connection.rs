//! Транспорт клиента: TCP-соединение и две фоновые задачи.
//!
//! Пишущая задача сериализует исходящие пакеты в кадры; читающая
//! декодирует входящие кадры и отдаёт пакеты корреляционному слою.
//! Обрыв чтения — это teardown: все незавершённые запросы
//! разрешаются исходом «отключён».

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::mpsc,
    time::timeout,
};
use tracing::{debug, trace, warn};

use super::core::ClientShared;
use crate::{
    error::ClientError,
    protocol::{frame, Packet},
};

/// Исходящее сообщение пишущей задаче.
#[derive(Debug)]
pub(crate) enum Outbound {
    Packet(Packet),
    /// Завершить задачу и закрыть свою половину сокета
    Close,
}

/// Подключается к брокеру с таймаутом.
pub(crate) async fn connect(
    addr: SocketAddr,
    connect_timeout: Duration,
) -> Result<TcpStream, ClientError> {
    debug!("Connecting to message queue broker at {addr}");
    timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ClientError::ConnectionTimeout)?
        .map_err(|e| ClientError::ConnectionFailed {
            address: addr.to_string(),
            reason: e.to_string(),
        })
}

/// Запускает пишущую и читающую задачи соединения.
pub(crate) fn spawn_io_tasks(
    stream: TcpStream,
    shared: Arc<ClientShared>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    let (read_half, mut write_half) = stream.into_split();

    tokio::spawn(async move {
        loop {
            match outbound_rx.recv().await {
                Some(Outbound::Packet(packet)) => {
                    if let Err(e) = frame::write_packet(&mut write_half, &packet).await {
                        trace!("Write to broker failed: {e}");
                        break;
                    }
                }
                Some(Outbound::Close) | None => break,
            }
        }
        let _ = write_half.shutdown().await;
    });

    tokio::spawn(async move {
        let mut reader = BufReader::new(read_half);
        loop {
            match frame::read_frame(&mut reader).await {
                Ok(Some(body)) => match Packet::decode(&body) {
                    Ok(packet) => {
                        trace!("Received {packet:?}");
                        shared.handle_packet(packet);
                    }
                    Err(e) => warn!("Dropping malformed frame from broker: {e}"),
                },
                Ok(None) => {
                    debug!("Broker closed the connection");
                    shared.connection_lost();
                    break;
                }
                Err(e) => {
                    debug!("Connection to broker lost: {e}");
                    shared.connection_lost();
                    break;
                }
            }
        }
    });
}
