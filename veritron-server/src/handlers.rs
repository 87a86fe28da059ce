use axum::{
    extract::{ws::Message, Path, State, WebSocketUpgrade},
    Json,
};
use futures::{SinkExt, StreamExt};
use veritron_api::{
    AuthToken, Comment, CommentSubmission, FeedMessage, Item, ItemId, NewItem, NewSession,
    NewViewer, Uuid, Viewer, VoteTally,
};
use veritron_core::{Service, Subscription};

use crate::{extractors::*, Error};

pub async fn admin_create_viewer(
    AdminAuth: AdminAuth,
    State(service): State<Service>,
    Json(data): Json<NewViewer>,
) -> Result<(), Error> {
    Ok(service.create_viewer(data).await?)
}

pub async fn admin_create_item(
    AdminAuth: AdminAuth,
    State(service): State<Service>,
    Json(data): Json<NewItem>,
) -> Result<Json<Item>, Error> {
    Ok(Json(service.create_item(data).await?))
}

pub async fn auth(
    State(service): State<Service>,
    Json(data): Json<NewSession>,
) -> Result<Json<AuthToken>, Error> {
    Ok(Json(service.open_session(data).await?))
}

pub async fn unauth(user: PreAuth, State(service): State<Service>) -> Result<(), Error> {
    Ok(service.close_session(user.0).await?)
}

pub async fn whoami(MaybeViewer(viewer): MaybeViewer) -> Json<Option<Viewer>> {
    Json(viewer)
}

pub async fn list_items(State(service): State<Service>) -> Result<Json<Vec<Item>>, Error> {
    Ok(Json(service.list_items().await?))
}

pub async fn get_item(
    State(service): State<Service>,
    Path(item): Path<Uuid>,
) -> Result<Json<Item>, Error> {
    Ok(Json(service.get_item(ItemId(item)).await?))
}

pub async fn toggle_vote(
    MaybeViewer(viewer): MaybeViewer,
    State(service): State<Service>,
    Path(item): Path<Uuid>,
) -> Result<Json<VoteTally>, Error> {
    Ok(Json(
        service.toggle_vote(viewer.as_ref(), ItemId(item)).await?,
    ))
}

pub async fn list_comments(
    State(service): State<Service>,
    Path(item): Path<Uuid>,
) -> Result<Json<Vec<Comment>>, Error> {
    Ok(Json(service.list_comments(ItemId(item)).await?))
}

pub async fn submit_comment(
    MaybeViewer(viewer): MaybeViewer,
    State(service): State<Service>,
    Path(item): Path<Uuid>,
    Json(data): Json<CommentSubmission>,
) -> Result<Json<Comment>, Error> {
    Ok(Json(
        service
            .submit_comment_with_id(viewer.as_ref(), ItemId(item), data.id, data.text)
            .await?,
    ))
}

pub async fn comment_feed(
    ws: WebSocketUpgrade,
    State(service): State<Service>,
    Path(item): Path<Uuid>,
) -> Result<axum::response::Response, Error> {
    let item = ItemId(item);
    // refuse unknown items before upgrading, so that the client gets a proper 404
    service.get_item(item).await?;
    let sub = service.subscribe_comments(item).await?;
    Ok(ws.on_upgrade(move |sock| {
        let (write, read) = sock.split();
        comment_feed_impl(write, read, sub)
    }))
}

async fn send_message<W>(write: &mut W, msg: FeedMessage) -> bool
where
    W: Unpin + futures::Sink<Message>,
{
    let json = match serde_json::to_vec(&msg) {
        Ok(json) => json,
        Err(err) => {
            tracing::error!(?err, ?msg, "failed serializing message to json");
            return false;
        }
    };
    write.send(Message::Binary(json)).await.is_ok()
}

/// Relays the subscription to the websocket until either side goes away
pub async fn comment_feed_impl<W, R>(mut write: W, read: R, mut sub: Subscription)
where
    W: 'static + Send + Unpin + futures::Sink<Message>,
    <W as futures::Sink<Message>>::Error: Send,
    R: 'static + Send + Unpin + futures::Stream<Item = Result<Message, axum::Error>>,
{
    let item = sub.item();
    tracing::debug!(?item, "comment feed websocket connected");
    let mut read = read.fuse();
    let mut alive = send_message(
        &mut write,
        FeedMessage::Snapshot(sub.view().comments().to_vec()),
    )
    .await;
    while alive {
        alive = tokio::select! {
            e = sub.next() => match e {
                None => false,
                Some(Ok(e)) => send_message(&mut write, FeedMessage::Comment(e)).await,
                Some(Err(err)) => {
                    // the client reconnects to get a fresh snapshot
                    tracing::error!(?err, ?item, "comment feed failed");
                    false
                }
            },
            msg = read.next() => match msg {
                None | Some(Ok(Message::Close(_))) => false,
                Some(Ok(Message::Text(msg))) if msg == "ping" => {
                    send_message(&mut write, FeedMessage::Pong).await
                }
                // protocol keepalives, answered by the websocket layer itself
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => true,
                Some(msg) => {
                    tracing::warn!("received unexpected message from client: {msg:?}");
                    false
                }
            },
        };
    }
    let _ = write.close().await;
    sub.unsubscribe();
    tracing::debug!(?item, "comment feed websocket disconnected");
}
