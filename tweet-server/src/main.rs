mod attachments;
mod errors;
mod params;
mod tweets;

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{delete, get, post, put, web, App, HttpRequest, HttpResponse, HttpServer, Responder};
use blob_store::{ChunkedBlobStore, LocalChunkStore};
use bytes::Bytes;
use clap::Parser;
use futures_util::{stream, TryStreamExt};
use validator::Validate;

use crate::errors::AttachmentError;
use crate::params::Args;
use crate::tweets::{TweetRequest, TweetStore};

struct AppState {
    tweets: TweetStore,
    blobs: ChunkedBlobStore,
    staging_dir: PathBuf,
}

#[get("/tweets")]
async fn get_all_tweets(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.tweets.find_all())
}

#[post("/tweets")]
async fn create_tweet(
    req: web::Json<TweetRequest>,
    state: web::Data<AppState>,
) -> impl Responder {
    if let Err(validation_err) = req.validate() {
        return HttpResponse::BadRequest().json(validation_err);
    }
    let tweet = state.tweets.create(req.into_inner().text);
    tracing::info!("created tweet {}", tweet.id);
    HttpResponse::Ok().json(tweet)
}

#[get("/tweets/{id}")]
async fn get_tweet_by_id(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> impl Responder {
    match state.tweets.find_by_id(&path) {
        Some(tweet) => HttpResponse::Ok().json(tweet),
        None => HttpResponse::NotFound().finish(),
    }
}

#[put("/tweets/{id}")]
async fn update_tweet(
    path: web::Path<String>,
    req: web::Json<TweetRequest>,
    state: web::Data<AppState>,
) -> impl Responder {
    if let Err(validation_err) = req.validate() {
        return HttpResponse::BadRequest().json(validation_err);
    }
    match state.tweets.update_text(&path, req.into_inner().text) {
        Some(tweet) => HttpResponse::Ok().json(tweet),
        None => HttpResponse::NotFound().finish(),
    }
}

#[delete("/tweets/{id}")]
async fn delete_tweet(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> impl Responder {
    match state.tweets.delete(&path) {
        Some(_) => HttpResponse::Ok().finish(),
        None => HttpResponse::NotFound().finish(),
    }
}

/// Tweets are sent to the client as server-sent events.
#[get("/stream/tweets")]
async fn stream_all_tweets(state: web::Data<AppState>) -> impl Responder {
    let frames: Vec<Result<Bytes, Infallible>> = state
        .tweets
        .find_all()
        .into_iter()
        .filter_map(|tweet| serde_json::to_string(&tweet).ok())
        .map(|json| Ok(Bytes::from(format!("data: {}\n\n", json))))
        .collect();
    HttpResponse::Ok()
        .content_type("text/event-stream")
        .streaming(stream::iter(frames))
}

#[post("/upload/{id}")]
async fn upload_attachment(
    path: web::Path<String>,
    mut payload: Multipart,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AttachmentError> {
    let id = path.into_inner();
    while let Some(field) = payload.try_next().await? {
        if field.name() != "file" {
            continue;
        }
        let meta = attachments::upload(&state.blobs, &state.staging_dir, &id, field).await?;
        tracing::info!("store file success: key {} -> blob {}", id, meta.id);
        return Ok(HttpResponse::Ok().finish());
    }
    Err(AttachmentError::MissingFilePart)
}

#[get("/download/{id}")]
async fn download_attachment(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AttachmentError> {
    match attachments::download(&state.blobs, &state.staging_dir, &path).await? {
        Some(file) => Ok(file.into_response(&req)),
        None => Ok(HttpResponse::NotFound().finish()),
    }
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(get_all_tweets)
        .service(create_tweet)
        .service(get_tweet_by_id)
        .service(update_tweet)
        .service(delete_tweet)
        .service(stream_all_tweets)
        .service(upload_attachment)
        .service(download_attachment);
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();

    let staging_dir = args
        .staging_dir
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&staging_dir)?;

    let chunks = LocalChunkStore::open(PathBuf::from(&args.data_dir))
        .await
        .map_err(std::io::Error::other)?;
    let blobs = ChunkedBlobStore::open(Arc::new(chunks))
        .await
        .map_err(std::io::Error::other)?;

    let state = web::Data::new(AppState {
        tweets: TweetStore::new(),
        blobs,
        staging_dir,
    });

    tracing::info!("listening on {}", args.http_addr);
    HttpServer::new(move || App::new().app_data(state.clone()).configure(routes))
        .bind(args.http_addr.clone())?
        .run()
        .await
}
