use anyhow::Result;
use base64::Engine;
use hyper::body::Incoming;
use hyper::header::HeaderValue;
use hyper::{Request, StatusCode};

use oriel_user::login::{ArcLoginProvider, Principal};

use super::codec::{rejection, HttpResponse};

pub(crate) const REALM: &str = "Basic realm=\"Oriel\"";

#[derive(Debug, PartialEq)]
enum Refused {
    Missing,
    Unsupported,
    Malformed(&'static str),
}

fn challenge(msg: &'static str) -> HttpResponse {
    let mut resp = rejection(StatusCode::UNAUTHORIZED, msg);
    resp.headers_mut()
        .insert("WWW-Authenticate", HeaderValue::from_static(REALM));
    resp
}

/// Split a basic Authorization value into a username/password pair
fn basic_credentials(value: Option<&HeaderValue>) -> Result<(String, String), Refused> {
    let auth_val = value
        .ok_or(Refused::Missing)?
        .to_str()
        .map_err(|_| Refused::Malformed("Authorization field is not ASCII"))?;

    let b64_creds_maybe_padded = match auth_val.split_once(' ') {
        Some(("Basic", b64)) => b64,
        _ => return Err(Refused::Unsupported),
    };

    // padding is optional for some clients
    let b64_creds_clean = b64_creds_maybe_padded.trim().trim_end_matches('=');

    let creds = base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(b64_creds_clean)
        .map_err(|_| Refused::Malformed("Authorization field is not valid base64"))?;
    let str_creds = String::from_utf8(creds)
        .map_err(|_| Refused::Malformed("Credentials are not valid UTF-8"))?;

    match str_creds.split_once(':') {
        Some((user, password)) => Ok((user.to_string(), password.to_string())),
        None => Err(Refused::Malformed(
            "Missing colon in Authorization, can't split it into a username/password pair",
        )),
    }
}

/// Check the basic credentials of a request, then hand it over to `next`
/// along with the authenticated principal.
pub(super) async fn auth<'a>(
    login: ArcLoginProvider,
    req: Request<Incoming>,
    next: impl FnOnce(Principal, Request<Incoming>) -> futures::future::BoxFuture<'a, Result<HttpResponse>>,
) -> Result<HttpResponse> {
    let (username, password) =
        match basic_credentials(req.headers().get(hyper::header::AUTHORIZATION)) {
            Ok(pair) => pair,
            Err(Refused::Missing) => {
                tracing::info!("Missing authorization field");
                return Ok(challenge("Missing Authorization field"));
            }
            Err(Refused::Unsupported) => {
                tracing::info!("Unsupported authorization field");
                return Ok(rejection(
                    StatusCode::BAD_REQUEST,
                    "Unsupported Authorization field",
                ));
            }
            Err(Refused::Malformed(msg)) => {
                tracing::info!(reason = msg, "Malformed authorization field");
                return Ok(rejection(StatusCode::BAD_REQUEST, msg));
            }
        };

    let principal = match login.login(&username, &password).await {
        Ok(p) => p,
        Err(_) => {
            tracing::info!(user = username, "Wrong credentials");
            return Ok(challenge("Wrong credentials"));
        }
    };
    tracing::debug!(user = principal.username, "authenticated");

    next(principal, req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(raw: &str) -> HeaderValue {
        HeaderValue::from_str(raw).unwrap()
    }

    #[test]
    fn credentials_are_decoded() {
        // alice:hunter2, with and without padding
        for raw in ["Basic YWxpY2U6aHVudGVyMg==", "Basic YWxpY2U6aHVudGVyMg"] {
            assert_eq!(
                basic_credentials(Some(&basic(raw))),
                Ok(("alice".to_string(), "hunter2".to_string()))
            );
        }
    }

    #[test]
    fn malformed_credentials_are_client_errors() {
        assert_eq!(basic_credentials(None), Err(Refused::Missing));
        assert_eq!(
            basic_credentials(Some(&basic("Bearer abc"))),
            Err(Refused::Unsupported)
        );
        for raw in [
            "Basic !!!not-base64!!!",
            // "alice" without a colon
            "Basic YWxpY2U=",
            // 0xff 0xfe
            "Basic //4=",
        ] {
            assert!(matches!(
                basic_credentials(Some(&basic(raw))),
                Err(Refused::Malformed(_))
            ));
        }
    }

    #[test]
    fn refusals_advertise_dav() {
        let resp = challenge("Wrong credentials");
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers()["WWW-Authenticate"], REALM);
        assert_eq!(resp.headers()["DAV"], "1, 2");
    }
}
