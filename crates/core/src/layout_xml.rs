//! Streaming rewrite of `launcher_layout.xml` / `launcher_draw_layout.xml`.
//!
//! Only placement attributes of edited items change. Every other element,
//! attribute and whitespace run is copied through as read.

use crate::error::EngineError;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use std::collections::{BTreeMap, BTreeSet};

const SCREENS: &[u8] = b"SCREENS";
const APPLICATIONS: &[u8] = b"APPLICATIONS";
const FOLDERS: &[u8] = b"FOLDERS";
const LAYOUT: &[u8] = b"LAYOUT";

pub const DOCK_SCREEN_ID: i64 = 999;

pub fn screen_id(screen: i64) -> i64 {
    1000 + screen
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XmlPlacement {
    pub container: i64,
    pub screen: i64,
    pub screen_id: i64,
    pub cell_x: i64,
    pub cell_y: i64,
    pub rank: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlFolder {
    pub id: i64,
    pub title: String,
    pub screen: i64,
    pub cell_x: i64,
    pub cell_y: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlApplication {
    pub id: i64,
    pub title: String,
    pub intent: String,
    pub user_id: i64,
    pub placement: XmlPlacement,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlEdit {
    pub placements: BTreeMap<i64, XmlPlacement>,
    pub removed: BTreeSet<i64>,
    pub new_folders: Vec<XmlFolder>,
    pub new_applications: Vec<XmlApplication>,
    pub screen_count: i64,
}

/// What a layout mirror says, as far as consistency checks care.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlLayout {
    pub has_applications: bool,
    /// Application `_id` → `container`.
    pub applications: BTreeMap<i64, i64>,
    pub folders: BTreeSet<i64>,
    pub screens: usize,
}

fn corrupt(e: impl std::fmt::Display) -> EngineError {
    EngineError::CorruptSnapshot(format!("layout xml: {e}"))
}

fn aborted(e: impl std::fmt::Display) -> EngineError {
    EngineError::TransactionAborted(format!("layout xml: {e}"))
}

fn int_attr(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<i64>, EngineError> {
    for attr in e.attributes() {
        let attr = attr.map_err(corrupt)?;
        if attr.key.as_ref() == key {
            let value = attr.unescape_value().map_err(corrupt)?;
            return Ok(value.trim().parse::<i64>().ok());
        }
    }
    Ok(None)
}

pub fn read_layout(xml: &str) -> Result<XmlLayout, EngineError> {
    let mut reader = Reader::from_str(xml);
    let mut out = XmlLayout::default();
    let mut section: Vec<Vec<u8>> = Vec::new();
    let mut saw_root = false;

    loop {
        match reader.read_event().map_err(corrupt)? {
            Event::Eof => break,
            Event::Start(e) => {
                if section.is_empty() {
                    saw_root = e.name().as_ref() == LAYOUT;
                }
                if e.name().as_ref() == APPLICATIONS {
                    out.has_applications = true;
                }
                record_item(&mut out, section.last().map(Vec::as_slice), &e)?;
                section.push(e.name().as_ref().to_vec());
            }
            Event::Empty(e) => {
                if section.is_empty() {
                    saw_root = e.name().as_ref() == LAYOUT;
                }
                if e.name().as_ref() == APPLICATIONS {
                    out.has_applications = true;
                }
                record_item(&mut out, section.last().map(Vec::as_slice), &e)?;
            }
            Event::End(_) => {
                section.pop();
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(corrupt("missing LAYOUT root"));
    }
    Ok(out)
}

fn record_item(
    out: &mut XmlLayout,
    parent: Option<&[u8]>,
    e: &BytesStart<'_>,
) -> Result<(), EngineError> {
    match parent {
        Some(SCREENS) => out.screens += 1,
        Some(APPLICATIONS) => {
            if let Some(id) = int_attr(e, b"_id")? {
                let container = int_attr(e, b"container")?.unwrap_or(-100);
                out.applications.insert(id, container);
            }
        }
        Some(FOLDERS) => {
            if let Some(id) = int_attr(e, b"_id")? {
                out.folders.insert(id);
            }
        }
        _ => {}
    }
    Ok(())
}

pub fn rewrite(xml: &str, edit: &XmlEdit) -> Result<String, EngineError> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + 1024));
    let mut section: Vec<Vec<u8>> = Vec::new();
    let mut wrote_folders = false;
    let mut wrote_applications = false;

    loop {
        match reader.read_event().map_err(corrupt)? {
            Event::Eof => break,
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                if section.last().map(Vec::as_slice) != Some(SCREENS)
                    && is_removed(&e, edit)?
                {
                    reader.read_to_end(e.name()).map_err(corrupt)?;
                    continue;
                }
                if name == SCREENS {
                    writer.write_event(Event::Start(e.clone())).map_err(aborted)?;
                    reader.read_to_end(e.name()).map_err(corrupt)?;
                    write_screens(&mut writer, edit.screen_count)?;
                    writer
                        .write_event(Event::End(BytesEnd::new("SCREENS")))
                        .map_err(aborted)?;
                    continue;
                }
                let elem = edited(&e, section.last().map(Vec::as_slice), edit)?;
                writer.write_event(Event::Start(elem)).map_err(aborted)?;
                section.push(name);
            }
            Event::Empty(e) => {
                let parent = section.last().map(Vec::as_slice);
                if parent != Some(SCREENS) && is_removed(&e, edit)? {
                    continue;
                }
                match e.name().as_ref() {
                    SCREENS => {
                        writer.write_event(Event::Start(e.clone())).map_err(aborted)?;
                        write_screens(&mut writer, edit.screen_count)?;
                        writer
                            .write_event(Event::End(BytesEnd::new("SCREENS")))
                            .map_err(aborted)?;
                    }
                    FOLDERS => {
                        writer.write_event(Event::Start(e.clone())).map_err(aborted)?;
                        write_folders(&mut writer, &edit.new_folders)?;
                        writer
                            .write_event(Event::End(BytesEnd::new("FOLDERS")))
                            .map_err(aborted)?;
                        wrote_folders = true;
                    }
                    APPLICATIONS => {
                        writer.write_event(Event::Start(e.clone())).map_err(aborted)?;
                        write_applications(&mut writer, &edit.new_applications)?;
                        writer
                            .write_event(Event::End(BytesEnd::new("APPLICATIONS")))
                            .map_err(aborted)?;
                        wrote_applications = true;
                    }
                    _ => {
                        let elem = edited(&e, parent, edit)?;
                        writer.write_event(Event::Empty(elem)).map_err(aborted)?;
                    }
                }
            }
            Event::End(e) => {
                match e.name().as_ref() {
                    FOLDERS => {
                        write_folders(&mut writer, &edit.new_folders)?;
                        wrote_folders = true;
                        if !edit.new_folders.is_empty() {
                            writer
                                .write_event(Event::Text(BytesText::new("\n  ")))
                                .map_err(aborted)?;
                        }
                    }
                    APPLICATIONS => {
                        write_applications(&mut writer, &edit.new_applications)?;
                        wrote_applications = true;
                        if !edit.new_applications.is_empty() {
                            writer
                                .write_event(Event::Text(BytesText::new("\n  ")))
                                .map_err(aborted)?;
                        }
                    }
                    LAYOUT => {
                        if !wrote_applications && !edit.new_applications.is_empty() {
                            write_section(&mut writer, "APPLICATIONS", |w| {
                                write_applications(w, &edit.new_applications)
                            })?;
                        }
                        if !wrote_folders && !edit.new_folders.is_empty() {
                            write_section(&mut writer, "FOLDERS", |w| {
                                write_folders(w, &edit.new_folders)
                            })?;
                        }
                    }
                    _ => {}
                }
                section.pop();
                writer.write_event(Event::End(e)).map_err(aborted)?;
            }
            other => writer.write_event(other).map_err(aborted)?,
        }
    }

    String::from_utf8(writer.into_inner()).map_err(aborted)
}

fn is_removed(e: &BytesStart<'_>, edit: &XmlEdit) -> Result<bool, EngineError> {
    if edit.removed.is_empty() {
        return Ok(false);
    }
    Ok(int_attr(e, b"_id")?.is_some_and(|id| edit.removed.contains(&id)))
}

/// Copy of `e` with placement attributes replaced when the item moved.
fn edited<'a>(
    e: &BytesStart<'a>,
    parent: Option<&[u8]>,
    edit: &XmlEdit,
) -> Result<BytesStart<'a>, EngineError> {
    if parent == Some(SCREENS) {
        return Ok(e.clone());
    }
    let Some(placement) = int_attr(e, b"_id")?.and_then(|id| edit.placements.get(&id)) else {
        return Ok(e.clone());
    };
    let values = placement_values(placement);

    let mut out = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    let mut seen = BTreeSet::new();
    for attr in e.attributes() {
        let attr: Attribute<'_> = attr.map_err(corrupt)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        match values.iter().find(|(k, _)| *k == key) {
            Some((k, v)) => {
                out.push_attribute((*k, v.as_str()));
                seen.insert(*k);
            }
            None => out.push_attribute(attr),
        }
    }
    for (k, v) in values.iter().take(REQUIRED_ATTRS) {
        if !seen.contains(k) {
            out.push_attribute((*k, v.as_str()));
        }
    }
    Ok(out.into_owned())
}

/// The first entries of `placement_values` must exist on every item.
const REQUIRED_ATTRS: usize = 5;

fn placement_values(p: &XmlPlacement) -> Vec<(&'static str, String)> {
    vec![
        ("container", p.container.to_string()),
        ("screenId", p.screen_id.to_string()),
        ("screen", p.screen.to_string()),
        ("cellX", p.cell_x.to_string()),
        ("cellY", p.cell_y.to_string()),
        ("new_container", p.container.to_string()),
        ("new_screen", p.screen.to_string()),
        ("new_cellX", p.cell_x.to_string()),
        ("new_cellY", p.cell_y.to_string()),
        ("rank", p.rank.to_string()),
        ("new_rank", p.rank.to_string()),
    ]
}

fn write_section<F>(writer: &mut Writer<Vec<u8>>, name: &str, body: F) -> Result<(), EngineError>
where
    F: FnOnce(&mut Writer<Vec<u8>>) -> Result<(), EngineError>,
{
    writer.write_event(Event::Text(BytesText::new("  "))).map_err(aborted)?;
    writer.write_event(Event::Start(BytesStart::new(name))).map_err(aborted)?;
    body(writer)?;
    writer.write_event(Event::Text(BytesText::new("\n  "))).map_err(aborted)?;
    writer.write_event(Event::End(BytesEnd::new(name))).map_err(aborted)?;
    writer.write_event(Event::Text(BytesText::new("\n"))).map_err(aborted)?;
    Ok(())
}

fn write_screens(writer: &mut Writer<Vec<u8>>, count: i64) -> Result<(), EngineError> {
    for i in 0..count {
        let mut screen = BytesStart::new("screen");
        screen.push_attribute(("_id", (i + 1).to_string().as_str()));
        screen.push_attribute(("screenId", screen_id(i).to_string().as_str()));
        screen.push_attribute(("screenNum", i.to_string().as_str()));
        screen.push_attribute(("new_id", i.to_string().as_str()));
        screen.push_attribute(("screenRank", i.to_string().as_str()));
        writer.write_event(Event::Text(BytesText::new("\n    "))).map_err(aborted)?;
        writer.write_event(Event::Empty(screen)).map_err(aborted)?;
    }
    writer.write_event(Event::Text(BytesText::new("\n  "))).map_err(aborted)?;
    Ok(())
}

fn write_folders(writer: &mut Writer<Vec<u8>>, folders: &[XmlFolder]) -> Result<(), EngineError> {
    for f in folders {
        let mut el = BytesStart::new("folder");
        let attrs = [
            ("_id", f.id.to_string()),
            ("title", f.title.clone()),
            ("container", "-100".to_string()),
            ("screenId", screen_id(f.screen).to_string()),
            ("screen", f.screen.to_string()),
            ("cellX", f.cell_x.to_string()),
            ("cellY", f.cell_y.to_string()),
            ("new_container", "-100".to_string()),
            ("new_screen", f.screen.to_string()),
            ("new_cellX", f.cell_x.to_string()),
            ("new_cellY", f.cell_y.to_string()),
            ("new_rank", "0".to_string()),
            ("curSpanX", "1".to_string()),
            ("curSpanY", "1".to_string()),
            ("spanX", "1".to_string()),
            ("spanY", "1".to_string()),
            ("recommendId", "-1".to_string()),
            ("options", "0".to_string()),
        ];
        for (k, v) in &attrs {
            el.push_attribute((*k, v.as_str()));
        }
        writer.write_event(Event::Text(BytesText::new("\n    "))).map_err(aborted)?;
        writer.write_event(Event::Empty(el)).map_err(aborted)?;
    }
    Ok(())
}

fn write_applications(
    writer: &mut Writer<Vec<u8>>,
    apps: &[XmlApplication],
) -> Result<(), EngineError> {
    for a in apps {
        let package = crate::launcher_db::package_of(&a.intent).unwrap_or_default();
        let class = crate::launcher_db::class_of(&a.intent).unwrap_or_default();
        let p = &a.placement;
        let mut el = BytesStart::new("application");
        let attrs = [
            ("_id", a.id.to_string()),
            ("title", a.title.clone()),
            ("packageName", package.to_string()),
            ("className", class.to_string()),
            ("container", p.container.to_string()),
            ("screenId", p.screen_id.to_string()),
            ("screen", p.screen.to_string()),
            ("cellX", p.cell_x.to_string()),
            ("cellY", p.cell_y.to_string()),
            ("new_container", p.container.to_string()),
            ("new_screen", p.screen.to_string()),
            ("new_cellX", p.cell_x.to_string()),
            ("new_cellY", p.cell_y.to_string()),
            ("new_rank", p.rank.to_string()),
            ("curSpanX", "1".to_string()),
            ("curSpanY", "1".to_string()),
            ("spanX", "1".to_string()),
            ("spanY", "1".to_string()),
            ("rank", p.rank.to_string()),
            ("user_id", a.user_id.to_string()),
            ("intent", a.intent.clone()),
            ("restored", "0".to_string()),
            ("profileId", "0".to_string()),
            ("options", "0".to_string()),
        ];
        for (k, v) in &attrs {
            el.push_attribute((*k, v.as_str()));
        }
        writer.write_event(Event::Text(BytesText::new("\n    "))).map_err(aborted)?;
        writer.write_event(Event::Empty(el)).map_err(aborted)?;
    }
    Ok(())
}
