//! Editing of C# `.csproj` files.
//!
//! Library references of C# projects are mirrored as `<ProjectReference>` items so
//! local tooling can resolve them. Edits are textual: the reference is inserted into
//! the last `<ItemGroup>` (or a new one), and removal cuts out only the matching
//! `<ProjectReference>` elements, taking their line with them when they stand alone.

use std::path::Path;
use std::process::Command;

use super::ProjectError;

/// Content of the `.csproj` created for new C# projects.
pub const MINIMAL_CSPROJ: &str = r#"<Project Sdk="Microsoft.NET.Sdk">
    <PropertyGroup>
        <TargetFramework>net6.0</TargetFramework>
        <OutputPath>bin/$(Configuration)</OutputPath>
        <AppendTargetFrameworkToOutputPath>false</AppendTargetFrameworkToOutputPath>
        <NoWarn>CS0618</NoWarn>
    </PropertyGroup>
    <ItemGroup>
        <PackageReference Include="QuantConnect.Lean" Version="2.5.*"/>
    </ItemGroup>
</Project>
"#;

fn reference_markers(include: &str) -> [String; 2] {
    [
        format!("<ProjectReference Include=\"{include}\""),
        format!("<ProjectReference Include='{include}'"),
    ]
}

/// Whether `content` already references `include`.
pub fn has_project_reference(content: &str, include: &str) -> bool {
    let markers = reference_markers(include);
    content
        .lines()
        .any(|line| markers.iter().any(|m| line.contains(m.as_str())))
}

/// Add a `<ProjectReference>` to `include`. Returns `None` when it is already present.
pub fn add_project_reference(content: &str, include: &str) -> Option<String> {
    if has_project_reference(content, include) {
        return None;
    }

    let newline = if content.contains("\r\n") { "\r\n" } else { "\n" };

    if let Some(close) = content.rfind("</ItemGroup>") {
        let line_start = content[..close].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let group_indent: String = content[line_start..close]
            .chars()
            .take_while(|c| c.is_whitespace())
            .collect();
        let item_indent = format!("{group_indent}    ");
        let insert_at = if content[line_start..close].trim().is_empty() {
            line_start
        } else {
            close
        };
        let item = if insert_at == line_start {
            format!("{item_indent}<ProjectReference Include=\"{include}\" />{newline}")
        } else {
            format!("{newline}{item_indent}<ProjectReference Include=\"{include}\" />{newline}{group_indent}")
        };
        let mut out = String::with_capacity(content.len() + item.len());
        out.push_str(&content[..insert_at]);
        out.push_str(&item);
        out.push_str(&content[insert_at..]);
        return Some(out);
    }

    let close = content.rfind("</Project>")?;
    let group = format!(
        "    <ItemGroup>{newline}        <ProjectReference Include=\"{include}\" />{newline}    </ItemGroup>{newline}"
    );
    let line_start = content[..close].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let insert_at = if content[line_start..close].trim().is_empty() {
        line_start
    } else {
        close
    };
    let mut out = String::with_capacity(content.len() + group.len());
    out.push_str(&content[..insert_at]);
    out.push_str(&group);
    out.push_str(&content[insert_at..]);
    Some(out)
}

/// Remove every `<ProjectReference>` pointing into the library directory `library_include`.
///
/// `library_include` is the directory part of the include path (e.g. `../Library/Utils`),
/// so references are dropped even when the library's `.csproj` no longer exists.
/// Returns `None` when nothing was removed.
pub fn remove_library_references(content: &str, library_include: &str) -> Option<String> {
    let prefix = library_include.trim_end_matches('/');
    let markers = [
        format!("<ProjectReference Include=\"{prefix}/"),
        format!("<ProjectReference Include='{prefix}/"),
    ];

    let mut out = content.to_string();
    let mut removed = false;
    while let Some(start) = markers.iter().filter_map(|m| out.find(m.as_str())).min() {
        let Some(end) = element_end(&out, start) else {
            break;
        };
        let line_start = out[..start].rfind('\n').map_or(0, |i| i + 1);
        let line_end = out[end..].find('\n').map_or(out.len(), |i| end + i + 1);
        let alone = out[line_start..start].trim().is_empty() && out[end..line_end].trim().is_empty();
        if alone {
            out.replace_range(line_start..line_end, "");
        } else {
            out.replace_range(start..end, "");
        }
        removed = true;
    }
    removed.then_some(out)
}

/// End of the `<ProjectReference>` element starting at `start`, self-closing or not.
fn element_end(content: &str, start: usize) -> Option<usize> {
    const CLOSE: &str = "</ProjectReference>";
    let open_end = start + content[start..].find('>')? + 1;
    if content[..open_end].ends_with("/>") {
        return Some(open_end);
    }
    content[open_end..]
        .find(CLOSE)
        .map(|i| open_end + i + CLOSE.len())
}

/// Run `dotnet restore` on `csproj` when dotnet is available.
///
/// Returns `Ok(false)` when dotnet is not installed.
pub fn restore(csproj: &Path) -> Result<bool, ProjectError> {
    let Ok(dotnet) = which::which("dotnet") else {
        tracing::debug!(path = %csproj.display(), "dotnet not found, skipping restore");
        return Ok(false);
    };

    tracing::info!("Restoring packages in '{}'", csproj.display());
    let output = Command::new(dotnet)
        .arg("restore")
        .arg(csproj)
        .output()
        .map_err(|e| ProjectError::io(csproj, e))?;

    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProjectError::RestoreFailed {
            path: csproj.to_path_buf(),
            message: format!("{}{}", stdout.trim(), stderr.trim()),
        });
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_to_last_item_group() {
        let out = add_project_reference(MINIMAL_CSPROJ, "../Library/Utils/Utils.csproj").unwrap();
        assert!(out.contains(
            "        <PackageReference Include=\"QuantConnect.Lean\" Version=\"2.5.*\"/>\n        <ProjectReference Include=\"../Library/Utils/Utils.csproj\" />\n    </ItemGroup>"
        ));
        assert!(add_project_reference(&out, "../Library/Utils/Utils.csproj").is_none());
    }

    #[test]
    fn test_add_without_item_group() {
        let content = "<Project Sdk=\"Microsoft.NET.Sdk\">\n</Project>\n";
        let out = add_project_reference(content, "../A/A.csproj").unwrap();
        assert_eq!(
            out,
            "<Project Sdk=\"Microsoft.NET.Sdk\">\n    <ItemGroup>\n        <ProjectReference Include=\"../A/A.csproj\" />\n    </ItemGroup>\n</Project>\n"
        );
    }

    #[test]
    fn test_remove_reference() {
        let added = add_project_reference(MINIMAL_CSPROJ, "../L/L.csproj").unwrap();
        let removed = remove_library_references(&added, "../L").unwrap();
        assert_eq!(removed, MINIMAL_CSPROJ);
        assert!(remove_library_references(MINIMAL_CSPROJ, "../L").is_none());
        assert!(remove_library_references(&added, "../Li").is_none());
    }

    #[test]
    fn test_remove_keeps_neighbours_on_the_same_line() {
        let content = "<Project>\n    <ItemGroup><ProjectReference Include=\"../L/L.csproj\" /><ProjectReference Include='../M/M.csproj' /></ItemGroup>\n</Project>\n";
        let removed = remove_library_references(content, "../L").unwrap();
        assert_eq!(
            removed,
            "<Project>\n    <ItemGroup><ProjectReference Include='../M/M.csproj' /></ItemGroup>\n</Project>\n"
        );
        let removed = remove_library_references(&removed, "../M").unwrap();
        assert_eq!(removed, "<Project>\n    <ItemGroup></ItemGroup>\n</Project>\n");
    }

    #[test]
    fn test_remove_element_with_children() {
        let content = "<Project>\n    <ItemGroup>\n        <ProjectReference Include=\"../L/L.csproj\">\n            <Private>false</Private>\n        </ProjectReference>\n        <ProjectReference Include=\"../M/M.csproj\" />\n    </ItemGroup>\n</Project>\n";
        let removed = remove_library_references(content, "../L").unwrap();
        assert_eq!(
            removed,
            "<Project>\n    <ItemGroup>\n        <ProjectReference Include=\"../M/M.csproj\" />\n    </ItemGroup>\n</Project>\n"
        );
    }

    #[test]
    fn test_reference_with_single_quotes_detected() {
        let content = "<ItemGroup><ProjectReference Include='../X/X.csproj' /></ItemGroup>";
        assert!(has_project_reference(content, "../X/X.csproj"));
    }
}
