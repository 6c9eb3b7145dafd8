//! Policy-driven walk over a box tree.
//!
//! For every box the policy sees the parser with that box open on top of the
//! stack and answers whether to skip its payload, load it into memory, or
//! descend into its children.

use crate::boxes::{BoxTree, FourCC, Mp4Box};
use crate::parser::{BoxParser, DEFAULT_LOAD_LIMIT, Result};
use std::io::{Cursor, Read, Seek};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseRule {
    Skip,
    Load,
    Descend,
}

pub trait ParseRules<R> {
    fn rule(&self, parser: &BoxParser<R>) -> ParseRule;
}

impl<R, F> ParseRules<R> for F
where
    F: Fn(&BoxParser<R>) -> ParseRule,
{
    fn rule(&self, parser: &BoxParser<R>) -> ParseRule {
        self(parser)
    }
}

pub struct TreeParser<R, P> {
    parser: BoxParser<R>,
    rules: P,
}

impl<R: Read + Seek, P: ParseRules<R>> TreeParser<R, P> {
    pub fn new(parser: BoxParser<R>, rules: P) -> Self {
        TreeParser { parser, rules }
    }

    pub fn parse(mut self) -> Result<BoxTree> {
        let mut boxes = Vec::new();
        while let Some(b) = self.parse_one()? {
            boxes.push(b);
        }
        Ok(BoxTree { boxes })
    }

    fn parse_children(&mut self) -> Result<Vec<Mp4Box>> {
        let mut boxes = Vec::new();
        while !self.parser.should_close_parent() {
            match self.parse_one()? {
                Some(b) => boxes.push(b),
                None => break,
            }
        }
        Ok(boxes)
    }

    fn parse_one(&mut self) -> Result<Option<Mp4Box>> {
        let Some(hdr) = self.parser.next_box()? else {
            return Ok(None);
        };
        let b = match self.rules.rule(&self.parser) {
            ParseRule::Skip => {
                self.parser.close_box()?;
                Mp4Box::new(hdr)
            }
            ParseRule::Load => self.parser.load_and_close_box()?,
            ParseRule::Descend => {
                let children = self.parse_children()?;
                self.parser.close_box()?;
                let mut b = Mp4Box::new(hdr);
                b.set_children(children);
                b
            }
        };
        Ok(Some(b))
    }
}

const META_PATHS_DESCEND: [&[FourCC]; 3] = [
    &[FourCC::MOOV],
    &[FourCC::EDVD],
    &[FourCC::EDVD, FourCC::MOOV],
];
const META_PATHS_LOAD: [&[FourCC]; 2] = [
    &[FourCC::MOOV, FourCC::META],
    &[FourCC::EDVD, FourCC::MOOV, FourCC::META],
];

/// Rule set loading `/moov/meta` and `/edvd/moov/meta`; everything else,
/// `mdat` in particular, is skipped without being read.
pub fn meta_rule<R: Read + Seek>(parser: &BoxParser<R>) -> ParseRule {
    if META_PATHS_DESCEND.iter().any(|p| parser.check_box_stack(p)) {
        ParseRule::Descend
    } else if META_PATHS_LOAD.iter().any(|p| parser.check_box_stack(p)) {
        ParseRule::Load
    } else {
        ParseRule::Skip
    }
}

/// Parse a whole file from its current position, loading only the
/// metadata boxes needed to read or edit depth information.
pub fn parse_for_meta<R: Read + Seek>(r: R) -> Result<BoxTree> {
    parse_for_meta_with_limit(r, DEFAULT_LOAD_LIMIT)
}

pub fn parse_for_meta_with_limit<R: Read + Seek>(r: R, load_limit: u64) -> Result<BoxTree> {
    let parser = BoxParser::new(r).with_load_limit(load_limit);
    TreeParser::new(parser, meta_rule::<R>).parse()
}

/// Split an in-memory buffer into its immediate boxes, each loaded.
pub fn split_boxes(data: &[u8]) -> Result<Vec<Mp4Box>> {
    let parser = BoxParser::new(Cursor::new(data)).with_limit(data.len() as u64);
    Ok(TreeParser::new(parser, load_all::<Cursor<&[u8]>>).parse()?.boxes)
}

fn load_all<R>(_: &BoxParser<R>) -> ParseRule {
    ParseRule::Load
}
