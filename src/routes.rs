use crate::database::{CatalogDb, FilmDb, UserDb};
use crate::error::Error;
use crate::model::*;
use crate::ranking::{RankingDb, DEFAULT_POPULAR_COUNT};
use crate::relations::{FriendDb, LikeDb};
use actix_web::{http::StatusCode, web, HttpResponse, ResponseError};
use log::debug;
use serde::{Deserialize, Serialize};

type Db = web::Data<sled::Db>;
type Result<T> = std::result::Result<T, Error>;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_)
            | Error::AlreadyFriends { .. }
            | Error::LikeAlreadyExists { .. }
            | Error::SelfReference(_)
            | Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } | Error::LikeNotFound { .. } => StatusCode::NOT_FOUND,
            Error::Config(_) | Error::Storage(_) | Error::Encoding(_) | Error::Corrupt(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error = if self.is_internal() {
            debug!("{:?}", self);
            "Database error".to_owned()
        } else {
            self.to_string()
        };
        HttpResponse::build(self.status_code()).json(ErrorBody { error })
    }
}

#[derive(Deserialize)]
struct PopularParams {
    count: Option<i64>,
}

async fn create_user(db: Db, user: web::Json<User>) -> Result<HttpResponse> {
    Ok(HttpResponse::Created().json(db.add_user(user.into_inner())?))
}

async fn update_user(db: Db, user: web::Json<User>) -> Result<web::Json<User>> {
    let user = user.into_inner();
    Ok(web::Json(db.update_user(user.id, user)?))
}

async fn update_user_by_id(
    db: Db,
    id: web::Path<Id>,
    user: web::Json<User>,
) -> Result<web::Json<User>> {
    Ok(web::Json(db.update_user(id.into_inner(), user.into_inner())?))
}

async fn list_users(db: Db) -> Result<web::Json<Vec<User>>> {
    Ok(web::Json(db.get_users()?))
}

async fn get_user(db: Db, id: web::Path<Id>) -> Result<web::Json<User>> {
    Ok(web::Json(db.get_user(id.into_inner())?))
}

async fn delete_user(db: Db, id: web::Path<Id>) -> Result<HttpResponse> {
    db.delete_user(id.into_inner())?;
    Ok(HttpResponse::NoContent().finish())
}

async fn add_friend(db: Db, path: web::Path<(Id, Id)>) -> Result<HttpResponse> {
    let (id, friend_id) = path.into_inner();
    db.add_friend(id, friend_id)?;
    Ok(HttpResponse::Ok().finish())
}

async fn remove_friend(db: Db, path: web::Path<(Id, Id)>) -> Result<HttpResponse> {
    let (id, friend_id) = path.into_inner();
    db.remove_friend(id, friend_id)?;
    Ok(HttpResponse::NoContent().finish())
}

async fn friends(db: Db, id: web::Path<Id>) -> Result<web::Json<Vec<User>>> {
    Ok(web::Json(db.get_friends(id.into_inner())?))
}

async fn common_friends(db: Db, path: web::Path<(Id, Id)>) -> Result<web::Json<Vec<User>>> {
    let (id, other_id) = path.into_inner();
    Ok(web::Json(db.get_common_friends(id, other_id)?))
}

async fn create_film(db: Db, film: web::Json<Film>) -> Result<HttpResponse> {
    Ok(HttpResponse::Created().json(db.add_film(film.into_inner())?))
}

async fn update_film(db: Db, film: web::Json<Film>) -> Result<web::Json<Film>> {
    let film = film.into_inner();
    Ok(web::Json(db.update_film(film.id, film)?))
}

async fn update_film_by_id(
    db: Db,
    id: web::Path<Id>,
    film: web::Json<Film>,
) -> Result<web::Json<Film>> {
    Ok(web::Json(db.update_film(id.into_inner(), film.into_inner())?))
}

async fn list_films(db: Db) -> Result<web::Json<Vec<Film>>> {
    Ok(web::Json(db.get_films()?))
}

async fn get_film(db: Db, id: web::Path<Id>) -> Result<web::Json<Film>> {
    Ok(web::Json(db.get_film(id.into_inner())?))
}

async fn delete_film(db: Db, id: web::Path<Id>) -> Result<HttpResponse> {
    db.delete_film(id.into_inner())?;
    Ok(HttpResponse::NoContent().finish())
}

async fn add_like(db: Db, path: web::Path<(Id, Id)>) -> Result<web::Json<Film>> {
    let (film_id, user_id) = path.into_inner();
    db.add_like(film_id, user_id)?;
    Ok(web::Json(db.get_film(film_id)?))
}

async fn remove_like(db: Db, path: web::Path<(Id, Id)>) -> Result<web::Json<Film>> {
    let (film_id, user_id) = path.into_inner();
    db.remove_like(film_id, user_id)?;
    Ok(web::Json(db.get_film(film_id)?))
}

async fn popular_films(db: Db, params: web::Query<PopularParams>) -> Result<web::Json<Vec<Film>>> {
    let count = params.count.unwrap_or(DEFAULT_POPULAR_COUNT);
    Ok(web::Json(db.get_top_films(count)?))
}

async fn list_genres(db: Db) -> Result<web::Json<Vec<Genre>>> {
    Ok(web::Json(db.get_genres()?))
}

async fn get_genre(db: Db, id: web::Path<Id>) -> Result<web::Json<Genre>> {
    Ok(web::Json(db.get_genre(id.into_inner())?))
}

async fn list_mpa(db: Db) -> Result<web::Json<Vec<Mpa>>> {
    Ok(web::Json(db.get_all_mpa()?))
}

async fn get_mpa(db: Db, id: web::Path<Id>) -> Result<web::Json<Mpa>> {
    Ok(web::Json(db.get_mpa(id.into_inner())?))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| Error::Validation(vec![err.to_string()]).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| Error::Validation(vec![err.to_string()]).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|err, _req| Error::Validation(vec![err.to_string()]).into()),
    )
    .route("/users", web::post().to(create_user))
    .route("/users", web::put().to(update_user))
    .route("/users", web::get().to(list_users))
    .route("/users/{id}", web::get().to(get_user))
    .route("/users/{id}", web::put().to(update_user_by_id))
    .route("/users/{id}", web::delete().to(delete_user))
    .route("/users/{id}/friends", web::get().to(friends))
    .route(
        "/users/{id}/friends/common/{other_id}",
        web::get().to(common_friends),
    )
    .route("/users/{id}/friends/{friend_id}", web::put().to(add_friend))
    .route(
        "/users/{id}/friends/{friend_id}",
        web::delete().to(remove_friend),
    )
    .route("/films", web::post().to(create_film))
    .route("/films", web::put().to(update_film))
    .route("/films", web::get().to(list_films))
    .route("/films/popular", web::get().to(popular_films))
    .route("/films/{id}", web::get().to(get_film))
    .route("/films/{id}", web::put().to(update_film_by_id))
    .route("/films/{id}", web::delete().to(delete_film))
    .route("/films/{id}/like/{user_id}", web::put().to(add_like))
    .route("/films/{id}/like/{user_id}", web::delete().to(remove_like))
    .route("/genres", web::get().to(list_genres))
    .route("/genres/{id}", web::get().to(get_genre))
    .route("/mpa", web::get().to(list_mpa))
    .route("/mpa/{id}", web::get().to(get_mpa));
}
