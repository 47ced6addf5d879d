//! A declaration scanner for GLSL sources, enough for the headless driver to report the
//! interface a real compiler would.
//!
//! It evaluates `#define`, `#undef`, `#ifdef`, `#ifndef`, `#else` and `#endif`, fails on an
//! active `#error`, and reads top-level `uniform` declarations, uniform blocks and (for the
//! vertex stage) `in` declarations. Expressions in `#if` are not supported.

use crate::driver::{ShaderStage, UniformType};
use std::collections::HashSet;

const QUALIFIERS: [&str; 7] = [
    "flat",
    "smooth",
    "noperspective",
    "centroid",
    "highp",
    "mediump",
    "lowp",
];

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Declared {
    pub name: String,
    pub ty: UniformType,
    pub size: u32,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct StageInterface {
    pub uniforms: Vec<Declared>,
    pub blocks: Vec<String>,
    /// Members of named uniform blocks, paired with the block name.
    pub block_members: Vec<(String, Declared)>,
    pub inputs: Vec<Declared>,
    pub has_main: bool,
}

pub(crate) fn scan(stage: ShaderStage, source: &str) -> Result<StageInterface, String> {
    let mut interface = StageInterface::default();
    let mut defines: HashSet<&str> = HashSet::new();
    let mut branches: Vec<bool> = Vec::new();
    let mut depth: i32 = 0;
    let mut open_block: Option<String> = None;

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.split("//").next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }

        let active = branches.iter().all(|taken| *taken);

        if let Some(directive) = line.strip_prefix('#') {
            let mut parts = directive.split_whitespace();
            let keyword = parts.next().unwrap_or_default();
            match keyword {
                "ifdef" | "ifndef" => {
                    let Some(name) = parts.next() else {
                        return Err(format!("ERROR: 0:{line_no}: '#{keyword}' : missing name"));
                    };
                    branches.push(defines.contains(name) == (keyword == "ifdef"));
                }
                "else" => {
                    let Some(top) = branches.last_mut() else {
                        return Err(format!("ERROR: 0:{line_no}: '#else' : without #if"));
                    };
                    *top = !*top;
                }
                "endif" => {
                    if branches.pop().is_none() {
                        return Err(format!("ERROR: 0:{line_no}: '#endif' : without #if"));
                    }
                }
                _ if !active => {}
                "define" => {
                    if let Some(name) = parts.next() {
                        defines.insert(name);
                    }
                }
                "undef" => {
                    if let Some(name) = parts.next() {
                        defines.remove(name);
                    }
                }
                "error" => {
                    let message = parts.collect::<Vec<_>>().join(" ");
                    return Err(format!("ERROR: 0:{line_no}: '#error' : {message}"));
                }
                _ => {}
            }
            continue;
        }

        if !active {
            continue;
        }

        if depth == 0 {
            if line.contains("main(") {
                interface.has_main = true;
            }
            let blocks = interface.blocks.len();
            declaration(stage, line, line_no, &mut interface)?;
            if interface.blocks.len() > blocks {
                open_block = interface.blocks.last().cloned();
            }
        } else if depth == 1
            && let Some(block) = &open_block
            && let Some(member) = block_member(line)
        {
            interface.block_members.push((block.clone(), member));
        }

        depth += line.matches('{').count() as i32;
        depth -= line.matches('}').count() as i32;
        if depth == 0 && line.contains('}') {
            open_block = None;
        }
    }

    if !branches.is_empty() {
        return Err("ERROR: unterminated conditional directive".to_string());
    }

    Ok(interface)
}

fn declaration(
    stage: ShaderStage,
    line: &str,
    line_no: usize,
    interface: &mut StageInterface,
) -> Result<(), String> {
    let mut rest = line;
    if rest.starts_with("layout")
        && let Some(end) = rest.find(')')
    {
        rest = rest[end + 1..].trim_start();
    }

    let body = rest.trim_end_matches(|c: char| c == ';' || c == '{' || c.is_whitespace());
    let tokens: Vec<&str> = body
        .split_whitespace()
        .filter(|t| !QUALIFIERS.contains(t))
        .collect();

    match tokens.as_slice() {
        ["uniform", block] => interface.blocks.push(block.to_string()),
        ["uniform", ty, name] => {
            let declared = declared(ty, name, line_no)?;
            interface.uniforms.push(declared);
        }
        ["in", ty, name] if stage == ShaderStage::Vertex => {
            let declared = declared(ty, name, line_no)?;
            interface.inputs.push(declared);
        }
        _ => {}
    }

    Ok(())
}

/// A `type name;` line inside a block. Struct-typed members are not reported.
fn block_member(line: &str) -> Option<Declared> {
    let body = line.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    let tokens: Vec<&str> = body
        .split_whitespace()
        .filter(|t| !QUALIFIERS.contains(t))
        .collect();
    match tokens.as_slice() {
        [ty, name] => declared(ty, name, 0).ok(),
        _ => None,
    }
}

fn declared(ty: &str, name: &str, line_no: usize) -> Result<Declared, String> {
    let Some(ty) = UniformType::from_glsl(ty) else {
        return Err(format!("ERROR: 0:{line_no}: '{ty}' : unknown type"));
    };

    let (name, size) = match name.split_once('[') {
        Some((base, len)) => {
            let len = len.trim_end_matches(']');
            let size = len.parse::<u32>().map_err(|_| {
                format!("ERROR: 0:{line_no}: '{len}' : array size must be a literal")
            })?;
            (base, size)
        }
        None => (name, 1),
    };

    Ok(Declared {
        name: name.to_string(),
        ty,
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
#version 330 core
#define VERT_SRC
layout(std140) uniform Camera {
    mat4 view;
};

#ifdef VERT_SRC
layout(location = 0) in vec3 position;
in mat4 i_model;
uniform float u_time; // animated
void main() {
    float unused = 1.0;
}
#else
uniform vec4 u_hidden;
#endif

#ifndef HAS_SHADOWS
uniform sampler2DShadow u_shadow_maps[4];
#endif
"#;

    #[test]
    fn reads_active_declarations() {
        let interface = scan(ShaderStage::Vertex, SOURCE).expect("source should scan");

        assert_eq!(interface.blocks, vec!["Camera".to_string()]);
        assert_eq!(interface.block_members.len(), 1);
        assert_eq!(interface.block_members[0].1.name, "view");
        let uniforms: Vec<_> = interface.uniforms.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(uniforms, vec!["u_time", "u_shadow_maps"]);
        assert_eq!(interface.uniforms[1].size, 4);
        assert_eq!(interface.inputs.len(), 2);
        assert_eq!(interface.inputs[1].ty, UniformType::Mat4);
        assert!(interface.has_main);
    }

    #[test]
    fn fragment_stage_ignores_inputs() {
        let source = "#version 330 core\nin vec3 v_normal;\nvoid main() {}\n";
        let interface = scan(ShaderStage::Fragment, source).expect("source should scan");
        assert!(interface.inputs.is_empty());
    }

    #[test]
    fn active_error_directive_fails() {
        let source = "#version 330 core\n#define BAD\n#ifdef BAD\n#error variant not supported\n#endif\n";
        let err = scan(ShaderStage::Fragment, source).unwrap_err();
        assert!(err.contains("variant not supported"));
        assert!(err.contains("0:4"));
    }

    #[test]
    fn inactive_error_directive_is_ignored() {
        let source = "#version 330 core\n#ifdef BAD\n#error nope\n#endif\nvoid main() {}\n";
        assert!(scan(ShaderStage::Fragment, source).is_ok());
    }

    #[test]
    fn unknown_type_fails() {
        let source = "uniform dmat4 u_bad;\n";
        assert!(scan(ShaderStage::Vertex, source).is_err());
    }
}
