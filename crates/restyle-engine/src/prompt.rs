//! Builds the ordered multimodal payload for one variant call.
//!
//! Context goes first, instructions after it:
//! 1. data-extraction lead-in, then the source image at high fidelity
//! 2. style lead-in and each reference at reduced fidelity (when present)
//! 3. the mode's task script, followed by the user's text or a fixed filler
//! 4. a differentiation hint when more than one variant is requested

use restyle_contracts::request::{ImageInput, Mode};

pub const SYSTEM_INSTRUCTION: &str = "You are a professional infographic and data visualization redesigner. \
Your absolute priority is DATA FIDELITY: every text, number, label, title, legend, axis, unit, and data point from the source image must appear in your output exactly as written, in the original language, with zero modifications. \
You apply visual styles from reference images (color palettes, typography styles, iconography, layout patterns, spacing) to create a fresh, polished design. \
You always produce a clean white background, clear visual hierarchy, proper alignments, and readable typography. \
You never invent data, never borrow text or numbers from inspiration images, and never omit any information from the source.";

const SOURCE_LEAD_IN: &str =
    "SOURCE CHART: Extract ALL data, text, numbers, labels, and structure from this image:";
const STYLE_LEAD_IN: &str = "STYLE REFERENCES: Extract ONLY visual style (colors, typography, icons, layout) from these images. Ignore their data content:";

const REDESIGN_SCRIPT: &[&str] = &[
    "TASK: Recreate the source chart with a completely new visual design inspired by the style references.",
    "",
    "STEP 1, DATA EXTRACTION: Identify and memorize every single piece of information in the source chart: all titles, subtitles, axis labels, data values, percentages, legends, footnotes, units, and annotations. Nothing may be omitted or altered.",
    "STEP 2, STYLE ANALYSIS: Study the visual language of the inspiration image(s): color palette, typography choices, icon style, layout structure, spacing rhythm, and overall aesthetic. Do not copy any information or text from the inspiration, only visual design.",
    "STEP 3, SYNTHESIS: Design a new chart that contains 100% of the source data, presented with the visual style extracted from the inspirations. Prioritize readability, clean alignment, and typographic hierarchy.",
    "",
    "OUTPUT: A single polished chart image on a white background.",
];
const NO_STYLE_HINT: &str =
    "No style reference provided. Improve the visual design using modern infographic best practices.";
const NO_EXTRA_INSTRUCTIONS: &str = "No additional user instructions.";

const EDIT_SCRIPT: &[&str] = &[
    "TASK: Apply ONLY the requested modifications to the source image. Do not redesign it.",
    "Preserve 100% of existing information, text, numbers, and language.",
    "Keep the current style unless the user explicitly asks to change it.",
    "Output only the modified image.",
];
const NO_EDITS: &str = "No modifications specified. Reproduce the source exactly as-is.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaResolution {
    High,
    Medium,
}

impl MediaResolution {
    pub fn as_level(&self) -> &'static str {
        match self {
            Self::High => "MEDIA_RESOLUTION_HIGH",
            Self::Medium => "MEDIA_RESOLUTION_MEDIUM",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    Image {
        image: ImageInput,
        resolution: MediaResolution,
    },
}

impl ContentPart {
    fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            Self::Image { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptParts {
    pub system_instruction: &'static str,
    pub parts: Vec<ContentPart>,
}

impl PromptParts {
    pub fn image_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|part| matches!(part, ContentPart::Image { .. }))
            .count()
    }
}

pub struct PromptInput<'a> {
    pub mode: Mode,
    pub source: &'a ImageInput,
    pub style_references: &'a [ImageInput],
    pub instruction: &'a str,
    /// 1-based.
    pub variant_index: u32,
    pub variant_total: u32,
}

pub fn build_parts(input: &PromptInput<'_>) -> PromptParts {
    let mut parts = vec![
        ContentPart::text(SOURCE_LEAD_IN),
        ContentPart::Image {
            image: input.source.clone(),
            resolution: MediaResolution::High,
        },
    ];

    if !input.style_references.is_empty() {
        parts.push(ContentPart::text(STYLE_LEAD_IN));
        for (idx, reference) in input.style_references.iter().enumerate() {
            parts.push(ContentPart::text(format!("Style reference {}:", idx + 1)));
            parts.push(ContentPart::Image {
                image: reference.clone(),
                resolution: MediaResolution::Medium,
            });
        }
    }

    parts.push(ContentPart::text(task_script(
        input.mode,
        input.instruction,
        input.style_references.len(),
    )));

    if input.variant_total > 1 {
        parts.push(ContentPart::text(differentiation_hint(
            input.mode,
            input.variant_index,
            input.variant_total,
        )));
    }

    PromptParts {
        system_instruction: SYSTEM_INSTRUCTION,
        parts,
    }
}

fn task_script(mode: Mode, instruction: &str, style_count: usize) -> String {
    let instruction = instruction.trim();
    let mut lines: Vec<String> = Vec::new();
    match mode {
        Mode::Initial => {
            lines.extend(REDESIGN_SCRIPT.iter().map(|line| line.to_string()));
            if style_count == 0 {
                lines.push(NO_STYLE_HINT.to_string());
            }
            lines.push(String::new());
            if instruction.is_empty() {
                lines.push(NO_EXTRA_INSTRUCTIONS.to_string());
            } else {
                lines.push("ADDITIONAL USER INSTRUCTIONS:".to_string());
                lines.push(instruction.to_string());
            }
        }
        Mode::Refine => {
            lines.extend(EDIT_SCRIPT.iter().map(|line| line.to_string()));
            lines.push(String::new());
            if instruction.is_empty() {
                lines.push(NO_EDITS.to_string());
            } else {
                lines.push("REQUESTED MODIFICATIONS:".to_string());
                lines.push(instruction.to_string());
            }
            if style_count > 0 {
                lines.push(format!("Style reference images provided: {style_count}."));
            }
        }
    }
    lines.join("\n")
}

fn differentiation_hint(mode: Mode, index: u32, total: u32) -> String {
    match mode {
        Mode::Initial => format!(
            "This is variant {index} of {total}. Use a distinctly different visual interpretation: different color palette, different typography weight, different layout arrangement. The data must remain identical across all variants."
        ),
        Mode::Refine => format!(
            "This is variant {index} of {total}. Make small visual differences compared to other variants while keeping the same modifications."
        ),
    }
}
