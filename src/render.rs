//! Single-page A4 PDF rendering of invoices.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use lopdf::{
    content::{Content, Operation},
    dictionary, Document, Object, Stream,
};
use tracing::{debug, warn};

use crate::{error::RenderError, invoice::display_datetime, invoice::InvoiceRecord};

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;

/// Greedy word wrap at `max_chars` characters per line.
pub fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        let candidate_len = if line.is_empty() {
            word.chars().count()
        } else {
            line.chars().count() + 1 + word.chars().count()
        };
        if candidate_len > max_chars && !line.is_empty() {
            lines.push(std::mem::take(&mut line));
            line.push_str(word);
        } else {
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// Text operations for one page; the built-in Helvetica only covers Latin-1,
/// other characters are drawn as `?`.
#[derive(Default)]
struct PageText {
    ops: Vec<Operation>,
}

impl PageText {
    fn draw(&mut self, text: &str, x: i64, y: i64, size: i64) {
        if text.is_empty() {
            return;
        }
        let bytes: Vec<u8> = text
            .chars()
            .map(|c| match u8::try_from(u32::from(c)) {
                Ok(b) if (0x20..0x7f).contains(&b) || b >= 0xa0 => b,
                _ => b'?',
            })
            .collect();
        self.ops.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), size.into()]),
            Operation::new("Td", vec![x.into(), y.into()]),
            Operation::new("Tj", vec![Object::string_literal(bytes)]),
            Operation::new("ET", vec![]),
        ]);
    }
}

fn layout(inv: &InvoiceRecord) -> PageText {
    let mut page = PageText::default();
    let or_dash = |s: &str| if s.is_empty() { "-".to_string() } else { s.to_string() };

    page.draw("INVOICE", 260, 800, 20);

    page.draw("From:", 50, 770, 12);
    page.draw(&or_dash(&inv.freelancer_name), 50, 755, 11);
    page.draw(&inv.freelancer_email, 50, 740, 11);
    page.draw(&inv.freelancer_address, 50, 725, 11);

    page.draw(&format!("Invoice #: {}", inv.invoice_number), 350, 770, 11);
    page.draw(&format!("Invoice Date: {}", inv.invoice_date), 350, 755, 11);
    page.draw(&format!("Due Date: {}", or_dash(&inv.due_date)), 350, 740, 11);

    page.draw("Bill To:", 50, 700, 12);
    page.draw(&or_dash(&inv.client_name), 50, 685, 11);
    page.draw(&inv.company, 50, 670, 11);
    page.draw(&inv.client_email, 50, 655, 11);
    page.draw(&inv.client_address, 50, 640, 11);

    let mut y = 610;
    if !inv.service_description.is_empty() {
        page.draw("Services:", 50, y, 12);
        y -= 18;
        for line in wrap_text(&inv.service_description, 100) {
            page.draw(&line, 50, y, 11);
            y -= 14;
            if y < 120 {
                break;
            }
        }
    }

    y -= 10;
    page.draw("Total Due:", 50, y, 12);
    let symbol = if inv.currency.is_empty() {
        "$".to_string()
    } else {
        inv.currency.to_uppercase()
    };
    page.draw(&format!("{symbol} {}", inv.total_amount), 120, y, 12);

    y -= 30;
    page.draw("Payment Info:", 50, y, 12);
    let mut py = y - 16;
    for line in wrap_text(&inv.payment_info, 90) {
        page.draw(&line, 50, py, 11);
        py -= 14;
        if py < 80 {
            break;
        }
    }

    page.draw(
        &format!("Submitted: {}", display_datetime(&inv.submitted_at_iso)),
        50,
        60,
        9,
    );
    page.draw(&format!("Author (pubkey): {}", inv.author_pubkey), 50, 46, 9);
    page
}

/// Render one invoice as PDF bytes.
pub fn render_pdf(inv: &InvoiceRecord) -> Result<Vec<u8>, RenderError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = Content {
        operations: layout(inv).ops,
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

/// Download name: `invoice-<number>.pdf`, or the submission time when the
/// number is empty. Characters outside `[A-Za-z0-9._-]` become `-`.
pub fn filename(inv: &InvoiceRecord) -> String {
    let stem = if inv.invoice_number.is_empty() {
        &inv.submitted_at_iso
    } else {
        &inv.invoice_number
    };
    let safe: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("invoice-{safe}.pdf")
}

/// Render every invoice into `dir`. A failed record does not stop the rest.
///
/// Clashing names get a numeric suffix in submission order, oldest first, so a
/// newer record never takes over a file an older one already occupies.
pub fn write_pdfs(dir: &Path, invoices: &[InvoiceRecord]) -> Vec<Result<PathBuf, RenderError>> {
    let mut order: Vec<usize> = (0..invoices.len()).collect();
    order.sort_by(|&a, &b| {
        let (ka, kb) = (invoices[a].key(), invoices[b].key());
        (ka.2, ka.0, ka.1).cmp(&(kb.2, kb.0, kb.1))
    });
    let mut used = HashSet::new();
    let mut names = vec![String::new(); invoices.len()];
    for i in order {
        names[i] = unique_name(&mut used, filename(&invoices[i]));
    }

    invoices
        .iter()
        .zip(names)
        .map(|(inv, name)| -> Result<PathBuf, RenderError> {
            let path = dir.join(name);
            let bytes = render_pdf(inv)?;
            fs::create_dir_all(dir)?;
            fs::write(&path, bytes)?;
            debug!(path = %path.display(), "wrote invoice");
            Ok(path)
        })
        .inspect(|res| {
            if let Err(e) = res {
                warn!("invoice render failed: {e}");
            }
        })
        .collect()
}

fn unique_name(used: &mut HashSet<String>, name: String) -> String {
    if used.insert(name.clone()) {
        return name;
    }
    let stem = name.trim_end_matches(".pdf");
    let mut n = 2;
    loop {
        let candidate = format!("{stem}-{n}.pdf");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn invoice(number: &str) -> InvoiceRecord {
        InvoiceRecord {
            freelancer_name: "Dana".into(),
            client_name: "Acme".into(),
            invoice_number: number.into(),
            invoice_date: "11/14/2023".into(),
            service_description: "Design work ".repeat(30),
            total_amount: "150".into(),
            payment_info: "IBAN DE00 0000".into(),
            author_pubkey: "ab".repeat(32),
            submitted_at_iso: "2023-11-14T22:13:20.000Z".into(),
            ..Default::default()
        }
    }

    #[test]
    fn renders_single_page_pdf() {
        let bytes = render_pdf(&invoice("INV-1")).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn non_latin_text_still_renders() {
        let mut inv = invoice("INV-2");
        inv.client_name = "株式会社 ✓".into();
        assert!(render_pdf(&inv).is_ok());
    }

    #[test]
    fn filename_fallbacks() {
        assert_eq!(filename(&invoice("INV/7 a")), "invoice-INV-7-a.pdf");
        assert_eq!(
            filename(&invoice("")),
            "invoice-2023-11-14T22-13-20.000Z.pdf"
        );
    }

    #[test]
    fn wraps_on_word_boundaries() {
        assert_eq!(
            wrap_text("aaa bbb ccc", 7),
            vec!["aaa bbb".to_string(), "ccc".to_string()]
        );
        assert_eq!(wrap_text("  ", 10), Vec::<String>::new());
        assert_eq!(wrap_text("toolongword x", 4), vec!["toolongword", "x"]);
    }

    #[test]
    fn writes_each_invoice_once() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        let results = write_pdfs(&out, &[invoice("A"), invoice("A"), invoice("B")]);
        let paths: Vec<PathBuf> = results.into_iter().map(Result::unwrap).collect();
        let names: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["invoice-A.pdf", "invoice-A-2.pdf", "invoice-B.pdf"]);
        assert!(paths.iter().all(|p| p.exists()));
    }

    #[test]
    fn newer_clash_keeps_older_file_name() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        let older = InvoiceRecord {
            client_name: "Older".into(),
            ..invoice("A")
        };
        write_pdfs(&out, &[older.clone()]);

        let newer = InvoiceRecord {
            client_name: "Newer".into(),
            submitted_at_iso: "2023-11-15T08:00:00.000Z".into(),
            ..invoice("A")
        };
        let results = write_pdfs(&out, &[newer, older]);
        let names: Vec<String> = results
            .into_iter()
            .map(|r| r.unwrap().file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["invoice-A-2.pdf", "invoice-A.pdf"]);
    }
}
