//! HTML pages served next to the JSON API.

use crate::model::{StoredUpload, UploadKind};

const STYLE: &str = "body{font-family:sans-serif;max-width:48rem;margin:2rem auto;padding:0 1rem}\
footer{margin-top:2rem;color:#777;font-size:.85rem}img,video{max-width:100%}";

/// Escape text for use in HTML bodies and quoted attributes
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn page(title: &str, body: &str, hostname: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n\
         <style>{STYLE}</style>\n</head>\n<body>\n{body}\n<footer>Served by {host}</footer>\n\
         </body>\n</html>\n",
        title = escape_html(title),
        host = escape_html(hostname),
    )
}

pub fn render_index(hostname: &str) -> String {
    let body = "<h1>Upload a file</h1>\n\
        <form action=\"/api/uploads\" method=\"post\" enctype=\"multipart/form-data\">\n\
        <input type=\"file\" name=\"file\" required>\n\
        <button type=\"submit\">Upload</button>\n\
        </form>";
    page("Uploads", body, hostname)
}

pub fn render_upload(stored: &StoredUpload, hostname: &str) -> String {
    let upload = &stored.upload;
    let url = escape_html(&stored.url.url);
    let short_id = escape_html(upload.short_id.as_str());

    let media = match upload.kind {
        UploadKind::Image => format!("<img src=\"{url}\" alt=\"{short_id}\">"),
        UploadKind::Video => format!("<video src=\"{url}\" controls></video>"),
        UploadKind::Audio => format!("<audio src=\"{url}\" controls></audio>"),
        UploadKind::File => format!("<a href=\"{url}\">Download</a>"),
    };

    let body = format!(
        "<h1>{short_id}</h1>\n{media}\n<p>{kind}, {size} bytes, {content_type}</p>\n\
         <p><a href=\"{url}\">Direct link</a> (expires {expires})</p>",
        kind = upload.kind,
        size = upload.content.size,
        content_type = escape_html(&upload.content.content_type),
        expires = stored.url.expires_at.format("%Y-%m-%d %H:%M:%S UTC"),
    );

    page(upload.short_id.as_str(), &body, hostname)
}

pub fn render_not_found(short_id: &str, hostname: &str) -> String {
    let body = format!(
        "<h1>Not found</h1>\n<p>No upload is known as <code>{}</code>.</p>",
        escape_html(short_id)
    );
    page("Not found", &body, hostname)
}

pub fn render_error(hostname: &str) -> String {
    page(
        "Error",
        "<h1>Something went wrong</h1>\n<p>Please try again later.</p>",
        hostname,
    )
}
