// ABOUTME: OAuth 1.0a HMAC-SHA1 request signing for vendors still on the legacy protocol
// ABOUTME: Builds the signature base string and the Authorization header per RFC 5849
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! OAuth 1.0a signing.
//!
//! Garmin's Health API authenticates every request with an OAuth 1.0a
//! `Authorization` header signed with HMAC-SHA1 over the consumer secret and the
//! token secret.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use ring::hmac;
use url::{form_urlencoded, Url};

/// Keys used to sign one request
#[derive(Clone, Copy)]
pub struct OAuth1Signer<'a> {
    /// Consumer key
    pub consumer_key: &'a str,
    /// Consumer secret
    pub consumer_secret: &'a str,
    /// Request or access token
    pub token: Option<&'a str>,
    /// Secret paired with `token`
    pub token_secret: Option<&'a str>,
}

fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

impl OAuth1Signer<'_> {
    /// `Authorization` header value for a request
    ///
    /// `params` holds query and form parameters that take part in the signature;
    /// `protocol_params` holds extra `oauth_*` values such as `oauth_callback` or
    /// `oauth_verifier`.
    #[must_use]
    pub fn authorization_header(
        &self,
        method: &str,
        url: &str,
        params: &[(&str, &str)],
        protocol_params: &[(&str, &str)],
    ) -> String {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let timestamp = Utc::now().timestamp().to_string();
        self.header_with(method, url, params, protocol_params, &nonce, &timestamp)
    }

    /// Deterministic variant of [`Self::authorization_header`]
    #[must_use]
    pub fn header_with(
        &self,
        method: &str,
        url: &str,
        params: &[(&str, &str)],
        protocol_params: &[(&str, &str)],
        nonce: &str,
        timestamp: &str,
    ) -> String {
        let mut oauth: Vec<(String, String)> = vec![
            ("oauth_consumer_key".to_owned(), self.consumer_key.to_owned()),
            ("oauth_nonce".to_owned(), nonce.to_owned()),
            ("oauth_signature_method".to_owned(), "HMAC-SHA1".to_owned()),
            ("oauth_timestamp".to_owned(), timestamp.to_owned()),
            ("oauth_version".to_owned(), "1.0".to_owned()),
        ];
        if let Some(token) = self.token {
            oauth.push(("oauth_token".to_owned(), token.to_owned()));
        }
        oauth.extend(
            protocol_params
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned())),
        );

        let signature = self.signature(method, url, params, &oauth);
        oauth.push(("oauth_signature".to_owned(), signature));

        let fields: Vec<String> = oauth
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", encode(k), encode(v)))
            .collect();
        format!("OAuth {}", fields.join(", "))
    }

    fn signature(
        &self,
        method: &str,
        url: &str,
        params: &[(&str, &str)],
        oauth: &[(String, String)],
    ) -> String {
        let base = signature_base_string(method, url, params, oauth);
        let key = format!(
            "{}&{}",
            encode(self.consumer_secret),
            encode(self.token_secret.unwrap_or_default())
        );
        let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key.as_bytes());
        STANDARD.encode(hmac::sign(&key, base.as_bytes()).as_ref())
    }
}

/// RFC 5849 signature base string
///
/// Query parameters embedded in `url` are folded into the parameter set and
/// stripped from the base URI.
#[must_use]
pub fn signature_base_string(
    method: &str,
    url: &str,
    params: &[(&str, &str)],
    oauth: &[(String, String)],
) -> String {
    let (base_uri, mut pairs) = match Url::parse(url) {
        Ok(mut parsed) => {
            let query: Vec<(String, String)> = parsed
                .query_pairs()
                .map(|(k, v)| (encode(&k), encode(&v)))
                .collect();
            parsed.set_query(None);
            parsed.set_fragment(None);
            (parsed.to_string(), query)
        }
        Err(_) => (url.to_owned(), Vec::new()),
    };

    pairs.extend(params.iter().map(|(k, v)| (encode(k), encode(v))));
    pairs.extend(oauth.iter().map(|(k, v)| (encode(k), encode(v))));
    pairs.sort();

    let normalized: Vec<String> = pairs.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        encode(&base_uri),
        encode(&normalized.join("&"))
    )
}

/// Parse an `application/x-www-form-urlencoded` token response
#[must_use]
pub fn parse_token_pair(body: &str) -> Option<(String, String)> {
    let mut token = None;
    let mut secret = None;
    for (key, value) in form_urlencoded::parse(body.as_bytes()) {
        match key.as_ref() {
            "oauth_token" => token = Some(value.into_owned()),
            "oauth_token_secret" => secret = Some(value.into_owned()),
            _ => {}
        }
    }
    Some((token?, secret?))
}
