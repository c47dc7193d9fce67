use http::StatusCode;

/// A short, human-readable description for an HTTP status code.
pub fn status_message(status: StatusCode) -> &'static str {
    match status.as_u16() {
        // 4xx
        400 => "Your browser has sent a malformed request.",
        401 => "You must be authenticated to use this service.",
        403 => "You do not have access to this service.",
        404 => "The page you've requested could not be found.",
        406 => "The content of this page is not accepted by your browser.",
        407 => "You must be authenticated with the proxy server to use this service.",
        408 => "Your browser did not send a request in a timely manner.",
        413 => "Your browser has sent a request that's too large to process.",
        414 => "Your browser has sent a request with a URI that's too large to process.",
        426 => "Maybe you're trying to access a WebSocket server?",
        429 => "Your request has been rate-limited, please decrease the number of requests.",
        431 => "Your browser has sent a request header that is too large to process.",
        451 => "Your request has been denied for legal reasons.",

        // 5xx
        501 => "The feature you've requested is not supported.",
        502 => "The service you've requested could not be contacted, please try again.",
        503 => "The service you've requested is temporarily unavailable, please try again.",
        504 => "The service you've requested did not respond in a timely manner, please try again.",
        505 => "Your browser's HTTP version is not supported.",

        400..=599 => "We're sorry, something went wrong!",
        _ => "That's all we know.",
    }
}

/// A rendered status page.
pub struct StatusPage {
    pub content_type: &'static str,
    pub body: String,
}

impl StatusPage {
    /// Render the page for a status code, honoring the client's `Accept`
    /// header: HTML unless the client prefers plain text.
    pub fn render(status: StatusCode, accept: Option<&str>) -> StatusPage {
        Self::render_message(status, status_message(status), accept)
    }

    /// Render the page with a custom message.
    pub fn render_message(status: StatusCode, message: &str, accept: Option<&str>) -> StatusPage {
        let code = status.as_u16();
        let text = status.canonical_reason().unwrap_or("Error");

        if prefers_html(accept) {
            StatusPage {
                content_type: "text/html; charset=utf-8",
                body: format!(
                    "<!DOCTYPE html>\n\
                     <html>\n\
                     <head>\n\
                     <meta charset=\"utf-8\">\n\
                     <title>{code} {text}</title>\n\
                     <style>\n\
                     body {{ font-family: sans-serif; color: #333; margin: 4em auto; max-width: 40em; }}\n\
                     h1 {{ font-weight: normal; }}\n\
                     p {{ color: #666; }}\n\
                     </style>\n\
                     </head>\n\
                     <body>\n\
                     <h1>{code} &mdash; {text}</h1>\n\
                     <p>{message}</p>\n\
                     </body>\n\
                     </html>\n",
                ),
            }
        } else {
            StatusPage {
                content_type: "text/plain; charset=utf-8",
                body: format!("{code} {text}\n\n{message}\n"),
            }
        }
    }
}

/// Pick between HTML and plain text from an `Accept` header.
///
/// HTML wins by default; plain text is served only when the client rates
/// `text/plain` strictly above the HTML types.
fn prefers_html(accept: Option<&str>) -> bool {
    let Some(accept) = accept else {
        return true;
    };

    let mut html_q: f32 = 0.0;
    let mut text_q: f32 = 0.0;

    for item in accept.split(',') {
        let mut parts = item.split(';');
        let media_type = parts.next().unwrap_or("").trim();

        let mut q = 1.0f32;
        for param in parts {
            if let Some(value) = param.trim().strip_prefix("q=") {
                q = value.trim().parse().unwrap_or(0.0);
            }
        }

        match media_type {
            "text/html" | "application/xhtml+xml" | "*/*" => html_q = html_q.max(q),
            "text/plain" => text_q = text_q.max(q),
            _ => {}
        }
    }

    text_q <= html_q
}
