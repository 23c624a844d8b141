use reqwest::cookie::{CookieStore, Jar};
use reqwest::redirect::Policy;
use reqwest::{Client as HttpClient, Response, StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;

/// HTTP plumbing for one login attempt.
///
/// Both inner clients share a cookie jar. The login flow needs to follow
/// redirects on page loads but inspect them on form posts, and reqwest fixes
/// the redirect policy per client.
pub struct Client {
    follow: HttpClient,
    no_redirect: HttpClient,
    jar: Arc<Jar>,
}

impl Client {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let jar = Arc::new(Jar::default());
        let follow = HttpClient::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .cookie_provider(Arc::clone(&jar))
            .build()?;
        let no_redirect = HttpClient::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .cookie_provider(Arc::clone(&jar))
            .redirect(Policy::none())
            .build()?;
        Ok(Self {
            follow,
            no_redirect,
            jar,
        })
    }

    pub fn follow(&self) -> &HttpClient {
        &self.follow
    }

    pub fn no_redirect(&self) -> &HttpClient {
        &self.no_redirect
    }

    /// The `Cookie` header the jar would send to `url`.
    pub fn cookie_header(&self, url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        let value = self.jar.cookies(&url)?;
        value.to_str().ok().map(str::to_string)
    }
}

/// Client for the authenticated download endpoint. Redirects are not
/// followed so a bounce to the login page can be recognised.
pub fn download_client(user_agent: &str, timeout: Duration) -> Result<HttpClient, reqwest::Error> {
    HttpClient::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .redirect(Policy::none())
        .build()
}

/// Drains a response into its status and body text.
pub async fn read_text(response: Response) -> Result<(StatusCode, String), reqwest::Error> {
    let status = response.status();
    let body = response.text().await?;
    Ok((status, body))
}
