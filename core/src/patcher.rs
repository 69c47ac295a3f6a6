//! # Patch Applicator
//!
//! Applies patch specifications to the parsed files of one module.
//!
//! Each patch targets a `resource` block by `type.name`. Every attribute of the
//! patch is read from the resource (if present), combined with the patch value
//! by the merge engine and written back as a freshly rendered attribute. Other
//! attributes and blocks are left untouched.

use crate::error::{AppError, AppResult, ParseError, ParseErrorKind};
use crate::index::{BlockHandle, ResourceKey};
use crate::merge::apply_strategy;
use crate::module_file::{attribute_value, ModuleFile};
use crate::overlay::{PatchAttribute, PatchSpec};
use hcl_edit::structure::{Attribute, Block, Structure, StructureMut};
use hcl_edit::{Decorate, Decorated, Ident, Span};
use indexmap::IndexMap;
use std::path::PathBuf;

/// Parsed files of one module, in load order.
pub type ModuleFiles = IndexMap<PathBuf, ModuleFile>;

const DEFAULT_INDENT: &str = "  ";

/// Applies `patches` in order, mutating `files` in place.
///
/// Fails with [`AppError::ResourceNotFound`] as soon as a patch targets a
/// resource that no file declares; files may then hold partial edits and
/// should be discarded.
pub fn apply_patches(files: &mut ModuleFiles, patches: &[PatchSpec]) -> AppResult<()> {
    for patch in patches {
        apply_patch(files, patch)?;
    }
    Ok(())
}

/// Finds the file and block declaring `key`. The first file in load order wins.
pub fn locate_resource(files: &ModuleFiles, key: &ResourceKey) -> Option<(usize, BlockHandle)> {
    let mut matches = files
        .values()
        .enumerate()
        .filter_map(|(i, file)| file.index().resources.get(key).map(|res| (i, res.block.clone())));

    let first = matches.next()?;
    let shadowed: Vec<String> = matches
        .filter_map(|(i, _)| files.get_index(i))
        .map(|(path, _)| path.display().to_string())
        .collect();

    if !shadowed.is_empty() {
        let winner = files
            .get_index(first.0)
            .map(|(path, _)| path.display().to_string())
            .unwrap_or_default();
        tracing::warn!(
            resource = %key,
            patched = %winner,
            ignored = ?shadowed,
            "resource declared in several files; only the first is patched"
        );
    }

    Some(first)
}

fn apply_patch(files: &mut ModuleFiles, patch: &PatchSpec) -> AppResult<()> {
    let key = patch.resource_key();
    let (file_pos, handle) =
        locate_resource(files, &key).ok_or_else(|| AppError::ResourceNotFound(key.clone()))?;
    let (_, file) = files
        .get_index_mut(file_pos)
        .ok_or_else(|| AppError::General(format!("file index {} out of range", file_pos)))?;

    tracing::debug!(
        resource = %key,
        file = %file.path().display(),
        attributes = patch.attributes.len(),
        "applying patch"
    );

    for (name, attr) in &patch.attributes {
        write_attribute(file, &handle, &key, name, attr)?;
    }
    Ok(())
}

fn write_attribute(
    file: &mut ModuleFile,
    handle: &BlockHandle,
    key: &ResourceKey,
    name: &str,
    attr: &PatchAttribute,
) -> AppResult<()> {
    let block = file
        .block(handle)
        .ok_or_else(|| AppError::ResourceNotFound(key.clone()))?;

    let existing = attribute_value(&block.body, name);
    let indent = attribute_indent(file, block, name);
    let oneline = block
        .span()
        .and_then(|span| file.original().get(span))
        .is_some_and(|text| !text.contains('\n'));
    let value = apply_strategy(existing, attr);

    tracing::trace!(resource = %key, attribute = name, strategy = %attr.strategy, "writing attribute");

    let rendered = value.render(&indent);
    let mut expr = hcl_edit::parser::parse_expr(&rendered).map_err(|err| {
        ParseError::new(
            file.path(),
            ParseErrorKind::Syntax(format!("patched value for '{}.{}': {}", key, name, err)),
        )
    })?;
    expr.decor_mut().set_prefix(" ");

    let ident = Ident::try_new(name)
        .map_err(|err| AppError::General(format!("invalid attribute name '{}': {}", name, err)))?;
    let mut attr_key = Decorated::new(ident);
    attr_key.decor_mut().set_suffix(" ");
    let mut replacement = Attribute::new(attr_key, expr);

    let block = file
        .block_mut(handle)
        .ok_or_else(|| AppError::ResourceNotFound(key.clone()))?;
    let body = &mut block.body;

    let existing_pos = body
        .iter()
        .position(|s| matches!(s, Structure::Attribute(a) if a.key.as_str() == name));

    match existing_pos {
        Some(pos) => {
            if let Structure::Attribute(old) = body.remove(pos) {
                *replacement.decor_mut() = old.decor().clone();
            }
            body.insert(pos, Structure::Attribute(replacement));
        }
        None => {
            let pos = body
                .iter()
                .enumerate()
                .filter(|(_, s)| matches!(s, Structure::Attribute(_)))
                .map(|(i, _)| i + 1)
                .last()
                .unwrap_or(0);
            if oneline {
                reflow_oneline(body.iter_mut(), &indent);
            }
            replacement.decor_mut().set_prefix(indent);
            body.insert(pos, Structure::Attribute(replacement));
        }
    }

    Ok(())
}

/// A `{ key = value }` body cannot hold a second attribute, so its
/// attributes move onto their own lines before one is added.
fn reflow_oneline<'a>(structures: impl Iterator<Item = StructureMut<'a>>, indent: &str) {
    for mut structure in structures {
        if let Some(mut attr) = structure.as_attribute_mut() {
            attr.decor_mut().set_prefix(indent.to_string());
            attr.decor_mut().set_suffix("");
            attr.value_mut().decor_mut().set_suffix("");
        }
    }
}

/// Indentation for attribute `name` of `block`.
///
/// Tries the attribute itself, then sibling attributes, then nested blocks,
/// and finally the block's own indentation plus one level.
fn attribute_indent(file: &ModuleFile, block: &Block, name: &str) -> String {
    let own = block.body.get_attribute(name).and_then(|a| a.span());
    let attributes = block.body.iter().filter_map(|s| match s {
        Structure::Attribute(a) => a.span(),
        Structure::Block(_) => None,
    });
    let blocks = block.body.iter().filter_map(|s| match s {
        Structure::Block(b) => b.span(),
        Structure::Attribute(_) => None,
    });

    if let Some(indent) = own
        .into_iter()
        .chain(attributes)
        .chain(blocks)
        .find_map(|span| file.indent_at(span.start))
    {
        return indent;
    }

    block
        .span()
        .and_then(|span| file.indent_at(span.start))
        .map_or_else(|| DEFAULT_INDENT.to_string(), |outer| outer + DEFAULT_INDENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::{parse_overlay, MergeStrategy};
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn files(sources: &[(&str, &str)]) -> ModuleFiles {
        sources
            .iter()
            .map(|(path, src)| (PathBuf::from(path), ModuleFile::parse(*src, *path).unwrap()))
            .collect()
    }

    fn patch(src: &str) -> Vec<PatchSpec> {
        parse_overlay(src, "test.kf.hcl").unwrap()
    }

    fn output(files: &ModuleFiles, path: &str) -> String {
        files[&PathBuf::from(path)].to_source()
    }

    #[test]
    fn test_replace_rewrites_only_target_attribute() {
        let mut module = files(&[(
            "main.tf",
            r#"resource "aws_instance" "web" {
  ami           = "ami-123"
  instance_type = "t3.micro"
}
"#,
        )]);
        let patches = patch(
            r#"patch "aws_instance" "web" {
  instance_type = "t3.large"
}"#,
        );

        apply_patches(&mut module, &patches).unwrap();

        assert_eq!(
            output(&module, "main.tf"),
            r#"resource "aws_instance" "web" {
  ami           = "ami-123"
  instance_type = "t3.large"
}
"#
        );
    }

    #[test]
    fn test_merge_keeps_existing_keys() {
        let mut module = files(&[(
            "main.tf",
            r#"resource "aws_instance" "web" {
  tags = {
    Name = "web"
  }
}
"#,
        )]);
        let patches = patch(
            r#"patch "aws_instance" "web" {
  tags = merge({ Owner = "team" })
}"#,
        );

        apply_patches(&mut module, &patches).unwrap();

        let out = output(&module, "main.tf");
        assert!(out.contains("    Name = \"web\"\n"), "{}", out);
        assert!(out.contains("    Owner = \"team\"\n"), "{}", out);
        assert!(out.contains("  }\n}"), "{}", out);
    }

    #[test]
    fn test_append_extends_list() {
        let mut module = files(&[(
            "main.tf",
            r#"resource "aws_instance" "web" {
  security_groups = ["sg-default"]
}
"#,
        )]);
        let patches = patch(
            r#"patch "aws_instance" "web" {
  security_groups = append(["sg-new"])
}"#,
        );

        apply_patches(&mut module, &patches).unwrap();

        assert!(output(&module, "main.tf").contains(r#"security_groups = ["sg-default", "sg-new"]"#));
    }

    #[test]
    fn test_missing_attribute_is_added() {
        let mut module = files(&[(
            "main.tf",
            r#"resource "aws_instance" "web" {
  ami = "ami-123"

  lifecycle {
    create_before_destroy = true
  }
}
"#,
        )]);
        let patches = patch(
            r#"patch "aws_instance" "web" {
  monitoring = merge(true)
}"#,
        );

        apply_patches(&mut module, &patches).unwrap();

        let out = output(&module, "main.tf");
        let added = out.find("  monitoring = true").expect(&out);
        let lifecycle = out.find("lifecycle").unwrap();
        assert!(added < lifecycle, "{}", out);
        assert!(out.contains("    create_before_destroy = true"));
    }

    #[test]
    fn test_merge_over_reference_degrades_to_replace() {
        let mut module = files(&[(
            "main.tf",
            r#"resource "aws_instance" "web" {
  tags = merge(local.common_tags, { Name = "web" })
}
"#,
        )]);
        let patches = patch(
            r#"patch "aws_instance" "web" {
  tags = merge({ Owner = "team" })
}"#,
        );

        apply_patches(&mut module, &patches).unwrap();

        let out = output(&module, "main.tf");
        assert!(!out.contains("local.common_tags"), "{}", out);
        assert!(out.contains("Owner = \"team\""), "{}", out);
    }

    #[test]
    fn test_unevaluated_patch_written_verbatim() {
        let mut module = files(&[(
            "main.tf",
            r#"resource "aws_instance" "web" {
  subnet_id = "subnet-123"
}
"#,
        )]);
        let patches = patch(
            r#"patch "aws_instance" "web" {
  subnet_id = var.private_subnet_ids[0]
}"#,
        );

        apply_patches(&mut module, &patches).unwrap();

        assert!(output(&module, "main.tf").contains("  subnet_id = var.private_subnet_ids[0]\n"));
    }

    #[test]
    fn test_replace_in_oneline_body_stays_oneline() {
        let mut module = files(&[(
            "main.tf",
            "resource \"aws_instance\" \"web\" { instance_type = \"t3.micro\" }\n",
        )]);
        let patches = patch(r#"patch "aws_instance" "web" { instance_type = "t3.large" }"#);

        apply_patches(&mut module, &patches).unwrap();

        assert_eq!(
            output(&module, "main.tf"),
            "resource \"aws_instance\" \"web\" { instance_type = \"t3.large\" }\n"
        );
    }

    #[test]
    fn test_add_to_oneline_body_reflows_cleanly() {
        let mut module = files(&[(
            "main.tf",
            "resource \"aws_instance\" \"web\" { ami = \"a\" }\n",
        )]);
        let patches = patch(r#"patch "aws_instance" "web" { monitoring = true }"#);

        apply_patches(&mut module, &patches).unwrap();

        let out = output(&module, "main.tf");
        assert!(out.contains("\n  ami = \"a\"\n  monitoring = true\n}"), "{:?}", out);
    }

    #[test]
    fn test_new_attribute_indented_like_nested_blocks() {
        let mut module = files(&[(
            "main.tf",
            "resource \"k\" \"w\" {\n\tnested {\n\t\tx = 1\n\t}\n}\n",
        )]);
        let patches = patch(r#"patch "k" "w" { a = 1 }"#);

        apply_patches(&mut module, &patches).unwrap();

        let out = output(&module, "main.tf");
        assert!(out.contains("\n\ta = 1\n"), "{:?}", out);
        assert!(out.contains("\tnested {\n\t\tx = 1\n\t}"), "{:?}", out);
    }

    #[test]
    fn test_crlf_file_keeps_unpatched_blocks_identical() {
        let tail = "# keep me\r\nresource \"k\" \"other\" {\r\n  b = 2\r\n}\r\n";
        let src = format!("resource \"k\" \"w\" {{\r\n  a = 1\r\n}}\r\n{}", tail);
        let mut module = files(&[("main.tf", src.as_str())]);
        let patches = patch(r#"patch "k" "w" { a = 5 }"#);

        apply_patches(&mut module, &patches).unwrap();

        let out = output(&module, "main.tf");
        assert!(out.contains("  a = 5\r\n"), "{:?}", out);
        assert!(out.ends_with(tail), "{:?}", out);
    }

    #[test]
    fn test_resource_not_found() {
        let mut module = files(&[("main.tf", "resource \"aws_instance\" \"web\" {}\n")]);
        let patches = patch(r#"patch "aws_instance" "nonexistent" { ami = "x" }"#);

        let err = apply_patches(&mut module, &patches).unwrap_err();
        match err {
            AppError::ResourceNotFound(key) => assert_eq!(key.as_str(), "aws_instance.nonexistent"),
            other => panic!("expected ResourceNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_lookup_is_exact_key() {
        let mut module = files(&[(
            "main.tf",
            "resource \"aws_instance\" \"webserver\" {\n  ami = \"a\"\n}\n",
        )]);
        let patches = patch(r#"patch "aws_instance" "web" { ami = "b" }"#);

        assert!(matches!(
            apply_patches(&mut module, &patches),
            Err(AppError::ResourceNotFound(_))
        ));
    }

    #[test]
    fn test_first_file_wins_for_duplicate_resource() {
        let mut module = files(&[
            ("a.tf", "resource \"aws_instance\" \"web\" {\n  ami = \"a\"\n}\n"),
            ("b.tf", "resource \"aws_instance\" \"web\" {\n  ami = \"b\"\n}\n"),
        ]);
        let patches = patch(r#"patch "aws_instance" "web" { ami = "patched" }"#);

        apply_patches(&mut module, &patches).unwrap();

        assert!(output(&module, "a.tf").contains("ami = \"patched\""));
        assert_eq!(output(&module, "b.tf"), "resource \"aws_instance\" \"web\" {\n  ami = \"b\"\n}\n");
        assert!(!module[&PathBuf::from("b.tf")].is_modified());
    }

    #[test]
    fn test_untouched_files_stay_identical() {
        let other = "# variables\nvariable \"x\" {\n  default = 1 # one\n}\n";
        let mut module = files(&[
            ("main.tf", "resource \"aws_instance\" \"web\" {\n  ami = \"a\"\n}\n"),
            ("variables.tf", other),
        ]);
        let patches = patch(r#"patch "aws_instance" "web" { ami = "b" }"#);

        apply_patches(&mut module, &patches).unwrap();

        assert_eq!(output(&module, "variables.tf"), other);
    }

    #[test]
    fn test_later_patch_sees_earlier_result() {
        let mut module = files(&[(
            "main.tf",
            "resource \"aws_instance\" \"web\" {\n  security_groups = [\"a\"]\n}\n",
        )]);
        let mut patches = patch(r#"patch "aws_instance" "web" { security_groups = append(["b"]) }"#);
        patches.extend(patch(r#"patch "aws_instance" "web" { security_groups = append(["c"]) }"#));

        apply_patches(&mut module, &patches).unwrap();

        assert!(output(&module, "main.tf").contains(r#"security_groups = ["a", "b", "c"]"#));
    }

    #[test]
    fn test_patch_built_in_code() {
        let mut module = files(&[("main.tf", "resource \"aws_s3_bucket\" \"logs\" {\n  bucket = \"logs\"\n}\n")]);
        let mut attributes = IndexMap::new();
        attributes.insert(
            "force_destroy".to_string(),
            PatchAttribute {
                value: Value::from(true),
                strategy: MergeStrategy::Replace,
            },
        );
        let spec = PatchSpec {
            target_type: "aws_s3_bucket".into(),
            target_name: "logs".into(),
            source_filter: None,
            attributes,
        };

        apply_patches(&mut module, &[spec]).unwrap();

        assert!(output(&module, "main.tf").contains("  force_destroy = true\n"));
    }
}
