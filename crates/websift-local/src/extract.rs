fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn has_any_text(s: &str) -> bool {
    s.chars().any(|c| !c.is_whitespace())
}

fn strip_tag_blocks(html: &str, tag: &str) -> String {
    // Minimal, best-effort stripper for <tag ...> ... </tag> blocks. Only
    // removes when a close tag is found; ASCII-case-insensitive on tag names.
    let tag_lc = tag.to_ascii_lowercase();
    let open_pat = format!("<{}", tag_lc);
    let close_pat = format!("</{}>", tag_lc);

    let mut out = String::new();
    let mut i = 0usize;
    let lower = html.to_ascii_lowercase();
    while let Some(rel_start) = lower[i..].find(&open_pat) {
        let start = i + rel_start;
        let after_open = start + open_pat.len();
        if let Some(rel_end) = lower[after_open..].find(&close_pat) {
            let end = after_open + rel_end + close_pat.len();
            out.push_str(&html[i..start]);
            i = end;
        } else {
            break;
        }
    }
    out.push_str(&html[i..]);
    out
}

fn class_or_id_lc(el: &html_scraper::ElementRef) -> String {
    let mut out = String::new();
    if let Some(c) = el.value().attr("class") {
        out.push_str(c);
        out.push(' ');
    }
    if let Some(i) = el.value().attr("id") {
        out.push_str(i);
    }
    out.to_ascii_lowercase()
}

fn is_boilerplate_container(el: &html_scraper::ElementRef) -> bool {
    // Structural UI words only; no site-specific heuristics. "comment" covers
    // discussion threads, which never contribute to the corpus.
    let tag = el.value().name();
    if matches!(tag, "nav" | "header" | "footer" | "aside") {
        return true;
    }
    let s = class_or_id_lc(el);
    if s.is_empty() {
        return false;
    }
    for bad in [
        "nav",
        "navbar",
        "menu",
        "sidebar",
        "footer",
        "header",
        "banner",
        "cookie",
        "consent",
        "ads",
        "advert",
        "promo",
        "subscribe",
        "newsletter",
        "comment",
        "disqus",
        "related",
        "share",
    ] {
        if s.contains(bad) {
            return true;
        }
    }
    false
}

fn element_text_chars(el: &html_scraper::ElementRef) -> usize {
    el.text().map(|t| t.chars().count()).sum()
}

fn element_link_text_chars(el: &html_scraper::ElementRef) -> usize {
    let Ok(sel) = html_scraper::Selector::parse("a") else {
        return 0;
    };
    el.select(&sel)
        .map(|a| a.text().map(|t| t.chars().count()).sum::<usize>())
        .sum()
}

fn has_excluded_ancestor(el: &html_scraper::ElementRef) -> bool {
    for node in el.ancestors() {
        if let Some(anc) = html_scraper::ElementRef::wrap(node) {
            // Tabular content is excluded from extraction wholesale.
            if anc.value().name() == "table" {
                return true;
            }
            if is_boilerplate_container(&anc) {
                return true;
            }
        }
    }
    false
}

fn pick_main_container<'a>(doc: &'a html_scraper::Html) -> Option<html_scraper::ElementRef<'a>> {
    let sel = html_scraper::Selector::parse("article, main, section, div").ok()?;

    let mut best_score: i64 = 0;
    let mut best: Option<html_scraper::ElementRef> = None;
    let mut seen = 0usize;

    for el in doc.select(&sel) {
        seen += 1;
        if seen > 20_000 {
            break;
        }
        if is_boilerplate_container(&el) || has_excluded_ancestor(&el) {
            continue;
        }
        let txt = element_text_chars(&el);
        if txt < 20 {
            continue;
        }
        // Prefer dense non-link text; link text is usually navigation or tag clouds.
        let link_txt = element_link_text_chars(&el);
        let mut score = txt as i64 - 2 * (link_txt as i64);
        match el.value().name() {
            "article" => score += 500,
            "main" => score += 300,
            _ => {}
        }
        if link_txt > txt / 2 {
            score -= 500;
        }
        if score > best_score {
            best_score = score;
            best = Some(el);
        }
    }

    best
}

/// Isolate the main readable text of a page, or `None` when no reliable main
/// content is identifiable.
///
/// Boilerplate (navigation, ads, comments) and tabular content are excluded.
/// Pure function over already-fetched markup: no network access, no retries.
/// `None` is not an error, merely "nothing to contribute".
pub fn main_text(html: &str) -> Option<String> {
    if !has_any_text(html) {
        return None;
    }

    // Drop script/style/noscript payloads first so JS and CSS never count as text.
    let html = strip_tag_blocks(html, "script");
    let html = strip_tag_blocks(&html, "style");
    let html = strip_tag_blocks(&html, "noscript");

    let doc = html_scraper::Html::parse_document(&html);
    let container = pick_main_container(&doc)?;

    // Gather block-level text within the winner, skipping anything nested in
    // tables or boilerplate containers the winner happens to wrap.
    let sel = html_scraper::Selector::parse("h1, h2, h3, p, li, blockquote, pre").ok()?;
    let mut paragraphs: Vec<String> = Vec::new();
    for el in container.select(&sel) {
        if has_excluded_ancestor(&el) {
            continue;
        }
        let t = norm_ws(&el.text().collect::<Vec<_>>().join(" "));
        if !t.is_empty() {
            paragraphs.push(t);
        }
    }

    let text = if paragraphs.is_empty() {
        norm_ws(&container.text().collect::<Vec<_>>().join(" "))
    } else {
        paragraphs.join("\n\n")
    };

    // Too little signal to call "main content".
    let non_ws = text.chars().filter(|c| !c.is_whitespace()).count();
    if non_ws < 25 {
        return None;
    }
    Some(text)
}
