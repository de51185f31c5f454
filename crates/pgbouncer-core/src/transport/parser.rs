//! Finite-state parser for the transport stream.
//!
//! ```text
//!                 <<<kind>>>                 [[[instance]]]
//! SeekingSection ───────────▶ InSection ───────────────────▶ InSubBlock
//!        ▲                        ▲  <<<kind>>>                │ │ row
//!        └────────────────────────┴────────────────────────────┘ └──▶ (counter + 1)
//! ```
//!
//! Each state owns an immutable context; a transition builds the next one
//! instead of mutating shared "current instance" / "current columns"
//! variables, so a sub-block can never inherit stale state from the
//! previous one.

use std::collections::BTreeMap;

use tracing::trace;

use super::{SectionHeader, parse_instance_marker};

/// One split row of a sub-block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// 1-based line number in the stream.
    pub number: usize,
    pub fields: Vec<String>,
}

/// Rows of one instance inside one section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubBlock {
    pub instance: String,
    pub separator: Option<char>,
    /// All rows; the first is the header row of a tabular section.
    pub lines: Vec<Line>,
}

impl SubBlock {
    /// Column names of a tabular sub-block.
    pub fn header(&self) -> Option<&[String]> {
        self.lines.first().map(|l| l.fields.as_slice())
    }

    /// Data rows of a tabular sub-block.
    pub fn data(&self) -> &[Line] {
        self.lines.get(1..).unwrap_or_default()
    }

    /// First field of the first row, for single value sections.
    pub fn value(&self) -> Option<&str> {
        self.lines
            .first()
            .and_then(|l| l.fields.first())
            .map(String::as_str)
    }
}

/// All sub-blocks of one section kind, in stream order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Section {
    pub name: String,
    pub blocks: Vec<SubBlock>,
}

impl Section {
    /// Sub-block of `instance`; the last one wins if it repeats.
    pub fn block(&self, instance: &str) -> Option<&SubBlock> {
        self.blocks.iter().rev().find(|b| b.instance == instance)
    }

    /// Instance names in stream order, without duplicates.
    pub fn instances(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for block in &self.blocks {
            if !names.contains(&block.instance.as_str()) {
                names.push(&block.instance);
            }
        }
        names
    }
}

/// A parsed stream, keyed by section name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransportStream {
    pub sections: BTreeMap<String, Section>,
}

impl TransportStream {
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }
}

/// Context of an open sub-block.
#[derive(Debug, Clone)]
struct SubBlockContext {
    header: SectionHeader,
    instance: String,
    /// Lines seen since the marker.
    line_count: usize,
}

impl SubBlockContext {
    fn advanced(&self) -> Self {
        Self {
            line_count: self.line_count + 1,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
enum ParserState {
    SeekingSection,
    InSection(SectionHeader),
    InSubBlock(SubBlockContext),
}

/// Parses a complete transport stream.
///
/// Never fails: lines outside any section or before the first instance
/// marker of a block are skipped, as are blank lines.
pub fn parse_stream(text: &str) -> TransportStream {
    let mut stream = TransportStream::default();
    let mut state = ParserState::SeekingSection;

    for (idx, raw) in text.lines().enumerate() {
        let number = idx + 1;
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        if let Some(header) = SectionHeader::parse(line.trim()) {
            state = ParserState::InSection(header);
            continue;
        }

        state = match state {
            ParserState::SeekingSection => {
                trace!("line {}: outside of any section", number);
                ParserState::SeekingSection
            }
            ParserState::InSection(header) => match parse_instance_marker(line.trim()) {
                Some(instance) => open_sub_block(&mut stream, header, instance),
                None => {
                    trace!("line {}: no instance marker yet", number);
                    ParserState::InSection(header)
                }
            },
            ParserState::InSubBlock(ctx) => match parse_instance_marker(line.trim()) {
                Some(instance) => open_sub_block(&mut stream, ctx.header, instance),
                None => {
                    let ctx = ctx.advanced();
                    push_line(&mut stream, &ctx, number, line);
                    ParserState::InSubBlock(ctx)
                }
            },
        };
    }

    stream
}

fn open_sub_block(
    stream: &mut TransportStream,
    header: SectionHeader,
    instance: &str,
) -> ParserState {
    let section = stream
        .sections
        .entry(header.name.clone())
        .or_insert_with(|| Section {
            name: header.name.clone(),
            blocks: Vec::new(),
        });
    section.blocks.push(SubBlock {
        instance: instance.to_string(),
        separator: header.separator,
        lines: Vec::new(),
    });
    ParserState::InSubBlock(SubBlockContext {
        header,
        instance: instance.to_string(),
        line_count: 0,
    })
}

fn push_line(stream: &mut TransportStream, ctx: &SubBlockContext, number: usize, line: &str) {
    let block = stream
        .sections
        .get_mut(&ctx.header.name)
        .and_then(|s| s.blocks.last_mut())
        .filter(|b| b.instance == ctx.instance);
    if let Some(block) = block {
        debug_assert_eq!(block.lines.len() + 1, ctx.line_count);
        block.lines.push(Line {
            number,
            fields: ctx.header.split(line),
        });
    }
}
