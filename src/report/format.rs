//! Turns the loosely markdown-shaped AI narrative into styled blocks for the
//! PDF renderer. Single left-to-right pass over lines, no nesting.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading(String),
    Bullet(String),
    Paragraph(String),
}

pub fn format_diagnostic(raw: &str) -> Vec<Block> {
    let mut blocks = Vec::new();

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("###") || line.starts_with("**") {
            // Marker characters are stripped wholesale; a line that was only
            // markers disappears.
            let text: String = line.chars().filter(|c| *c != '#' && *c != '*').collect();
            let text = text.trim();
            if !text.is_empty() {
                blocks.push(Block::Heading(text.to_string()));
            }
        } else if line.starts_with("* ") || line.starts_with("- ") {
            blocks.push(Block::Bullet(line[2..].trim().to_string()));
        } else if !line.starts_with("---") {
            blocks.push(Block::Paragraph(line.to_string()));
        }
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_bullets_and_paragraphs_keep_input_order() {
        let blocks = format_diagnostic("### Findings\n- cyst present\nNormal retina\n---\n");
        assert_eq!(
            blocks,
            vec![
                Block::Heading("Findings".to_string()),
                Block::Bullet("cyst present".to_string()),
                Block::Paragraph("Normal retina".to_string()),
            ]
        );
    }

    #[test]
    fn blank_input_yields_no_blocks() {
        assert!(format_diagnostic("").is_empty());
        assert!(format_diagnostic("\n\n   \n\t\n").is_empty());
    }

    #[test]
    fn marker_only_heading_is_dropped() {
        assert!(format_diagnostic("**  **").is_empty());
        assert!(format_diagnostic("####").is_empty());
    }

    #[test]
    fn bold_and_deep_headings_are_recognized() {
        let blocks = format_diagnostic("**Retinal Layers:**\n#### Foveal Morphology");
        assert_eq!(
            blocks,
            vec![
                Block::Heading("Retinal Layers:".to_string()),
                Block::Heading("Foveal Morphology".to_string()),
            ]
        );
    }

    #[test]
    fn both_bullet_prefixes_are_accepted() {
        let blocks = format_diagnostic("* subretinal fluid\n- drusenoid elevation");
        assert_eq!(
            blocks,
            vec![
                Block::Bullet("subretinal fluid".to_string()),
                Block::Bullet("drusenoid elevation".to_string()),
            ]
        );
    }

    #[test]
    fn rule_lines_are_dropped_but_dashes_inside_text_are_kept() {
        let blocks = format_diagnostic("----\npre-retinal membrane");
        assert_eq!(
            blocks,
            vec![Block::Paragraph("pre-retinal membrane".to_string())]
        );
    }
}
