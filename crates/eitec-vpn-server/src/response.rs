//! The JSON response envelope shared by every endpoint:
//! `{code, message, data}`, with `total/page/size` added on paginated
//! listings.

use actix_web::HttpResponse;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub code: u16,
    pub message: String,
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct PageEnvelope<T: Serialize> {
    pub code: u16,
    pub message: String,
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub size: i64,
}

pub fn ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(Envelope {
        code: 200,
        message: "ok".into(),
        data,
    })
}

pub fn created<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Created().json(Envelope {
        code: 201,
        message: "created".into(),
        data,
    })
}

pub fn page<T: Serialize>(data: Vec<T>, total: i64, page: i64, size: i64) -> HttpResponse {
    HttpResponse::Ok().json(PageEnvelope {
        code: 200,
        message: "ok".into(),
        data,
        total,
        page,
        size,
    })
}
