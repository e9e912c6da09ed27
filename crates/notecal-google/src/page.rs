//! HTTP responses written back to the browser that completed the redirect.

use notecal_core::html_escape;

const SUCCESS_BODY: &str = "<!DOCTYPE html>
<html>
<head><meta charset=\"utf-8\"><title>notecal: authorization successful</title></head>
<body style=\"font-family: sans-serif; text-align: center; padding: 50px;\">
<h1>Authorization successful</h1>
<p>You can close this window and return to your notes.</p>
</body>
</html>
";

/// The page served when the redirect was accepted.
pub fn success_page() -> String {
    response("200 OK", SUCCESS_BODY)
}

/// The page served when the redirect was rejected.
///
/// `message` may contain provider-supplied text and is escaped.
pub fn failure_page(message: &str) -> String {
    let body = format!(
        "<!DOCTYPE html>
<html>
<head><meta charset=\"utf-8\"><title>notecal: authorization failed</title></head>
<body style=\"font-family: sans-serif; text-align: center; padding: 50px;\">
<h1>Authorization failed</h1>
<p>{}</p>
<p>You can close this window and return to your notes.</p>
</body>
</html>
",
        html_escape(message)
    );
    response("400 Bad Request", &body)
}

/// Plain response for requests that are not the redirect.
pub fn status_page(status: &str) -> String {
    response(status, status)
}

fn response(status: &str, body: &str) -> String {
    let content_type = if body.starts_with("<!DOCTYPE") {
        "text/html; charset=utf-8"
    } else {
        "text/plain; charset=utf-8"
    };
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}
