use std::sync::Arc;

use application::{ConnectionGateway, ConnectionHandle};
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ServerEvent, UserId};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::mpsc;

/// WebSocket 写操作命令
///
/// 发送任务是 sink 的唯一持有者，其它任务通过命令通道写入
#[derive(Debug)]
enum WsCommand {
    SendText(String),
    SendPong(Bytes),
}

/// 运行单个已认证连接直至断开
///
/// - 发送任务：把网关推送的事件序列化为文本帧
/// - 接收任务：把客户端文本帧交给网关分发
///
/// 任意一端结束后终止另一端，再由网关完成离房清理
pub async fn serve(socket: WebSocket, gateway: Arc<ConnectionGateway>, user_id: UserId) {
    let (connection, mut outbound) = gateway.open(user_id).await;
    let (sender, mut incoming) = socket.split();
    let (cmd_tx, cmd_rx) = mpsc::channel::<WsCommand>(32);

    let mut send_task = tokio::spawn(async move {
        write_loop(sender, cmd_rx, &mut outbound).await;
        tracing::debug!("WebSocket发送任务结束");
    });

    let mut recv_task = tokio::spawn({
        let gateway = gateway.clone();
        let connection = connection.clone();
        async move {
            while let Some(Ok(message)) = incoming.next().await {
                if handle_incoming(message, &gateway, &connection, &cmd_tx)
                    .await
                    .is_err()
                {
                    break;
                }
            }
            tracing::debug!("WebSocket接收任务结束");
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            // 等待接收任务真正退出，之后不会再有事件改动成员身份
            let _ = recv_task.await;
        }
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.on_disconnect(&connection).await;
    tracing::info!(
        connection_id = %connection.id(),
        user_id = %connection.user_id(),
        "WebSocket连接已断开"
    );
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, WsMessage>,
    mut commands: mpsc::Receiver<WsCommand>,
    outbound: &mut mpsc::UnboundedReceiver<ServerEvent>,
) {
    loop {
        let command = tokio::select! {
            Some(command) = commands.recv() => command,
            event = outbound.recv() => {
                let Some(event) = event else { break };
                match event.to_json() {
                    Ok(json) => WsCommand::SendText(json),
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to serialize websocket payload");
                        continue;
                    }
                }
            }
        };

        let frame = match command {
            WsCommand::SendText(text) => WsMessage::Text(text.into()),
            WsCommand::SendPong(data) => WsMessage::Pong(data),
        };
        if let Err(err) = sender.send(frame).await {
            tracing::debug!(error = %err, "WebSocket写入失败");
            break;
        }
    }
    let _ = sender.close().await;
}

/// 处理来自客户端的帧，返回 `Err` 表示连接应当关闭
async fn handle_incoming(
    message: WsMessage,
    gateway: &ConnectionGateway,
    connection: &ConnectionHandle,
    cmd_tx: &mpsc::Sender<WsCommand>,
) -> Result<(), ()> {
    match message {
        WsMessage::Text(text) => {
            gateway.dispatch_frame(connection, text.as_str()).await;
        }
        WsMessage::Close(_) => {
            tracing::debug!(connection_id = %connection.id(), "WebSocket收到关闭消息");
            return Err(());
        }
        WsMessage::Ping(data) => {
            if cmd_tx.send(WsCommand::SendPong(data)).await.is_err() {
                tracing::warn!("Failed to send pong command");
                return Err(());
            }
        }
        WsMessage::Pong(_) => {}
        WsMessage::Binary(_) => {
            tracing::debug!(connection_id = %connection.id(), "忽略二进制帧");
        }
    }
    Ok(())
}
