//! Tesseract TSV output parsing
//!
//! TSV columns: `level page_num block_num par_num line_num word_num left top
//! width height conf text`. Word rows (level 5) are grouped into one block per
//! `(page_num, block_num)`.

use std::collections::BTreeMap;

use crate::types::{BlockFrame, RawTextBlock};

const WORD_LEVEL: u32 = 5;

struct Word {
    page: u32,
    block: u32,
    paragraph: u32,
    line: u32,
    left: f64,
    top: f64,
    width: f64,
    height: f64,
    text: String,
}

fn parse_word(row: &str) -> Option<Word> {
    let columns: Vec<&str> = row.split('\t').collect();
    if columns.len() < 12 {
        return None;
    }

    let level: u32 = columns[0].trim().parse().ok()?;
    if level != WORD_LEVEL {
        return None;
    }

    let conf: f64 = columns[10].trim().parse().ok()?;
    let text = columns[11..].join("\t").trim().to_string();
    if conf < 0.0 || text.is_empty() {
        return None;
    }

    Some(Word {
        page: columns[1].trim().parse().ok()?,
        block: columns[2].trim().parse().ok()?,
        paragraph: columns[3].trim().parse().ok()?,
        line: columns[4].trim().parse().ok()?,
        left: columns[6].trim().parse().ok()?,
        top: columns[7].trim().parse().ok()?,
        width: columns[8].trim().parse().ok()?,
        height: columns[9].trim().parse().ok()?,
        text,
    })
}

#[derive(Default)]
struct BlockBuilder {
    lines: BTreeMap<(u32, u32), Vec<String>>,
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

impl BlockBuilder {
    fn push(&mut self, word: Word) {
        if self.lines.is_empty() {
            self.min_x = word.left;
            self.min_y = word.top;
            self.max_x = word.left + word.width;
            self.max_y = word.top + word.height;
        } else {
            self.min_x = self.min_x.min(word.left);
            self.min_y = self.min_y.min(word.top);
            self.max_x = self.max_x.max(word.left + word.width);
            self.max_y = self.max_y.max(word.top + word.height);
        }
        self.lines
            .entry((word.paragraph, word.line))
            .or_default()
            .push(word.text);
    }

    fn finish(self) -> RawTextBlock {
        let text = self
            .lines
            .into_values()
            .map(|words| words.join(" "))
            .collect::<Vec<_>>()
            .join("\n");
        RawTextBlock {
            text,
            frame: Some(BlockFrame {
                left: self.min_x,
                top: self.min_y,
                width: self.max_x - self.min_x,
                height: self.max_y - self.min_y,
            }),
        }
    }
}

/// Parse Tesseract TSV into text blocks in reading order.
///
/// The header row and any malformed rows are ignored.
pub fn parse_tsv_blocks(tsv: &str) -> Vec<RawTextBlock> {
    let mut blocks: BTreeMap<(u32, u32), BlockBuilder> = BTreeMap::new();

    for word in tsv.lines().filter_map(parse_word) {
        blocks.entry((word.page, word.block)).or_default().push(word);
    }

    blocks.into_values().map(BlockBuilder::finish).collect()
}
