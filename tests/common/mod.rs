#![allow(dead_code)]

use std::path::{Path, PathBuf};

pub fn guidex_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("guidex");
    path
}

/// One-page PDF whose text has one line per entry, top to bottom.
///
/// Builds the body first and then an xref with the real byte offsets so
/// both pdf-extract and lopdf can parse it.
pub fn pdf_with_lines(lines: &[&str]) -> Vec<u8> {
    let mut content = String::from("BT /F1 14 Tf 72 720 Td");
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            content.push_str(" 0 -36 Td");
        }
        let escaped = line
            .replace('\\', "\\\\")
            .replace('(', "\\(")
            .replace(')', "\\)");
        content.push_str(&format!(" ({}) Tj", escaped));
    }
    content.push_str(" ET");

    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// One-page PDF drawing one solid-color RGB image XObject per entry, in order.
pub fn pdf_with_images(images: &[(u32, u32, [u8; 3])]) -> Vec<u8> {
    use lopdf::{dictionary, Dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut xobjects = Dictionary::new();
    let mut content = String::new();
    for (i, (width, height, rgb)) in images.iter().enumerate() {
        let pixels = rgb.repeat((*width * *height) as usize);
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => *width as i64,
                "Height" => *height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            pixels,
        ));
        let name = format!("Im{}", i);
        xobjects.set(name.as_bytes(), image_id);
        content.push_str(&format!(
            "q {} 0 0 {} 72 {} cm /{} Do Q\n",
            width,
            height,
            100 + 200 * i,
            name
        ));
    }

    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
    let resources_id = doc.add_object(dictionary! { "XObject" => xobjects });
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

/// The two-guide corpus used across tests.
pub fn write_guides(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join("create_organization.pdf"),
        pdf_with_lines(&[
            "1. Create Organization",
            "2. Choose a Plan",
            "Made with Scribe",
        ]),
    )
    .unwrap();
    std::fs::write(
        dir.join("invite_team_member.pdf"),
        pdf_with_lines(&[
            "1. Open Members Page",
            "2. Invite Team Member",
            "3. Copy",
        ]),
    )
    .unwrap();
}

/// Config for the local SQLite backend rooted at `root`.
pub fn sqlite_config(root: &Path) -> String {
    format!(
        r#"default_pipeline = "text"

[store]
backend = "sqlite"

[store.sqlite]
path = "{root}/data/guidex.sqlite"

[extract]
artifacts_dir = "{root}/extracted_images"

[corpus]
root = "{root}/guides"
"#,
        root = root.display()
    )
}
