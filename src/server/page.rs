use std::fmt::Write as _;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::flash::Flash;
use crate::swarm::Transfer;

/// Path characters left as they are in download links.
const PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

pub fn file_link(transfer: &Transfer, path: &str) -> String {
    format!(
        "/torrent/{}/{}",
        transfer.info_hash,
        utf8_percent_encode(path, PATH)
    )
}

/// Completion in percent with three decimals, `0` while the size is unknown.
pub fn progress(transfer: &Transfer) -> String {
    match transfer.length() {
        None => "0".to_string(),
        Some(0) => format!("{:.3}", 100.0),
        Some(length) => format!(
            "{:.3}",
            transfer.bytes_completed() as f64 * 100.0 / length as f64
        ),
    }
}

/// The listing page. Transfers are rendered in the order given.
pub fn render<T: AsRef<Transfer>>(transfers: &[T], flash: Option<&Flash>) -> String {
    let mut html = String::from(concat!(
        "<!DOCTYPE html>\n",
        "<html>\n<head>\n",
        "<meta charset=\"utf-8\">\n",
        "<title>torrent-gateway</title>\n",
        "<link rel=\"stylesheet\" href=\"/static/style.css\">\n",
        "</head>\n<body>\n",
    ));
    if let Some(flash) = flash {
        let _ = writeln!(
            html,
            "<p class=\"flash {}\">{}</p>",
            flash.kind,
            escape(&flash.message)
        );
    }
    html.push_str(concat!(
        "<form method=\"post\" action=\"/\">\n",
        "<input type=\"text\" name=\"magnet\" placeholder=\"magnet:?xt=urn:btih:...\" size=\"80\">\n",
        "<button type=\"submit\">Add</button>\n",
        "</form>\n",
    ));
    for transfer in transfers {
        let transfer = transfer.as_ref();
        let _ = writeln!(
            html,
            "<section>\n<h2>{}</h2>\n<p class=\"progress\">{}%</p>\n<ul>",
            escape(&transfer.name()),
            progress(transfer)
        );
        for file in transfer.files() {
            let _ = writeln!(
                html,
                "<li><a href=\"{}\">{}</a></li>",
                escape(&file_link(transfer, &file.path)),
                escape(&file.path)
            );
        }
        html.push_str("</ul>\n</section>\n");
    }
    html.push_str("</body>\n</html>\n");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::transfer::tests::test_transfer;
    use crate::testing::{test_data, test_multi_file_info};

    #[test]
    fn escape_markup() {
        assert_eq!(
            escape("<a href=\"x\">Tom & Jerry's</a>"),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&#39;s&lt;/a&gt;"
        );
    }

    #[tokio::test]
    async fn links_and_progress() {
        let dir = tempfile::tempdir().unwrap();
        let data = test_data(100);
        let info = test_multi_file_info(
            "show",
            &[("season 1/a&b.mkv", &data[..50]), ("notes.txt", &data[50..])],
            64,
        );
        let transfer = test_transfer(dir.path(), &info);
        assert_eq!(progress(&transfer), "0");

        transfer.set_info(info.clone()).await.unwrap();
        assert_eq!(progress(&transfer), "0.000");
        assert!(transfer.piece_downloaded(1, data[64..].to_vec()).await.unwrap());
        assert_eq!(progress(&transfer), "36.000");

        assert_eq!(
            file_link(&transfer, "show/season 1/a&b.mkv"),
            format!("/torrent/{}/show/season%201/a%26b.mkv", info.info_hash)
        );
        let html = render(&[transfer.clone()], Some(&Flash::info("Added <show>")));
        assert!(html.contains("<p class=\"flash info\">Added &lt;show&gt;</p>"));
        assert!(html.contains("<h2>show</h2>"));
        assert!(html.contains("36.000%"));
        assert!(html.contains(">show/season 1/a&amp;b.mkv</a>"));
    }
}
