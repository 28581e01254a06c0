use std::fs;
use std::path::Path;
use std::sync::Arc;

use haml_lang::{
    Bindings, CompileErrorKind, CompileOptions, CompiledTemplate, Error, Interpreter, Registry,
    RenderErrorKind, TemplateLoader,
};
use tempfile::TempDir;

fn write(dir: &Path, name: &str, contents: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn fixture(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, contents) in files {
        write(dir.path(), name, contents);
    }
    dir
}

#[test]
fn test_include_splices_at_depth_with_bindings() {
    let dir = fixture(&[
        ("main.hamljl", "%ul\n  - for x in xs\n    - @include(\"row.hamljl\", item=x)"),
        ("row.hamljl", "%li= item"),
    ]);
    let loader = TemplateLoader::new();
    let out = loader
        .render_file(dir.path().join("main.hamljl"), Bindings::new().with("xs", vec!["a", "b"]))
        .unwrap();
    assert_eq!(out, "<ul>\n  <li>a</li>\n  <li>b</li>\n</ul>");
}

#[test]
fn test_include_paths_are_relative_to_including_file() {
    let dir = fixture(&[
        ("pages/index.hamljl", "%main\n  - @include(\"../partials/nav.hamljl\")"),
        ("partials/nav.hamljl", "%nav\n  - @include(\"links.hamljl\")"),
        ("partials/links.hamljl", "%a(href=\"/\") Home"),
    ]);
    let out = TemplateLoader::new()
        .render_file(dir.path().join("pages/index.hamljl"), Bindings::new())
        .unwrap();
    assert_eq!(
        out,
        "<main>\n  <nav>\n    <a href=\"/\">Home</a>\n  </nav>\n</main>"
    );
}

#[test]
fn test_include_bindings_are_scoped() {
    let dir = fixture(&[
        ("main.hamljl", "- @include(\"part.hamljl\", label=\"x\")\n%p= label"),
        ("part.hamljl", "%span= label"),
    ]);
    let err = TemplateLoader::new()
        .render_file(dir.path().join("main.hamljl"), Bindings::new())
        .unwrap_err();
    match err {
        Error::Render(e) => {
            assert_eq!(e.kind, RenderErrorKind::UndefinedVariable);
            assert_eq!(e.location.as_ref().map(|l| l.line), Some(2));
        }
        other => panic!("expected render error, got {other:?}"),
    }
}

#[test]
fn test_included_errors_name_the_included_file() {
    let dir = fixture(&[
        ("main.hamljl", "%div\n  - @include(\"broken.hamljl\")"),
        ("broken.hamljl", "%p ok\n%p= nope"),
    ]);
    let err = TemplateLoader::new()
        .render_file(dir.path().join("main.hamljl"), Bindings::new())
        .unwrap_err();
    let Error::Render(e) = err else {
        panic!("expected render error");
    };
    let location = e.location.unwrap();
    assert_eq!(location.line, 2);
    assert!(location.file.unwrap().ends_with("broken.hamljl"));
}

#[test]
fn test_include_cycle_is_compile_error() {
    let dir = fixture(&[
        ("a.hamljl", "%p a\n- @include(\"b.hamljl\")"),
        ("b.hamljl", "%p b\n- @include(\"a.hamljl\")"),
    ]);
    let err = TemplateLoader::new()
        .load(dir.path().join("a.hamljl"))
        .unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::Include);
    assert!(err.message.contains("cycle"));
    assert!(err.hint.as_deref().is_some_and(|h| h.contains("b.hamljl")));
}

#[test]
fn test_missing_include_is_compile_error() {
    let dir = fixture(&[("main.hamljl", "%div\n  - @include(\"nowhere.hamljl\")")]);
    let err = TemplateLoader::new()
        .load(dir.path().join("main.hamljl"))
        .unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::Include);
    assert_eq!(err.location.line, 2);
}

#[test]
fn test_sourcefile_is_verbatim() {
    let dir = fixture(&[
        ("page.hamljl", "%script\n  - @sourcefile(\"app.js\")"),
        ("app.js", "if (a < b && c) { go(); }"),
    ]);
    let out = TemplateLoader::new()
        .render_file(dir.path().join("page.hamljl"), Bindings::new())
        .unwrap();
    assert_eq!(out, "<script>\n  if (a < b && c) { go(); }\n</script>");
}

#[test]
fn test_cdatafile_splits_terminators() {
    let dir = fixture(&[
        ("page.hamljl", "- @cdatafile(\"data.xml\")"),
        ("data.xml", "a]]>b"),
    ]);
    let out = TemplateLoader::new()
        .render_file(dir.path().join("page.hamljl"), Bindings::new())
        .unwrap();
    assert_eq!(out, "<![CDATA[a]]]]><![CDATA[>b]]>");
}

#[test]
fn test_loader_caches_by_canonical_path() {
    let dir = fixture(&[("t.hamljl", "%p= n")]);
    let loader = TemplateLoader::new();

    let first = loader.load(dir.path().join("t.hamljl")).unwrap();
    let second = loader.load(dir.path().join(".").join("t.hamljl")).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(loader.len(), 1);

    // Edits are not seen until the cache is cleared.
    write(dir.path(), "t.hamljl", "%b= n");
    let out = loader
        .render_file(dir.path().join("t.hamljl"), Bindings::new().with("n", 1))
        .unwrap();
    assert_eq!(out, "<p>1</p>");

    loader.clear();
    assert!(loader.is_empty());
    let out = loader
        .render_file(dir.path().join("t.hamljl"), Bindings::new().with("n", 1))
        .unwrap();
    assert_eq!(out, "<b>1</b>");
}

#[test]
fn test_loader_concurrent_first_load_compiles_once() {
    let dir = fixture(&[("t.hamljl", "%p hi")]);
    let loader = Arc::new(TemplateLoader::new());
    let path = dir.path().join("t.hamljl");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let loader = Arc::clone(&loader);
            let path = path.clone();
            std::thread::spawn(move || loader.load(path).unwrap())
        })
        .collect();
    let templates: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(templates.iter().all(|t| Arc::ptr_eq(t, &templates[0])));
    assert_eq!(loader.len(), 1);
}

#[test]
fn test_loader_base_dir() {
    let dir = fixture(&[("views/home.hamljl", "%h1 Home")]);
    let loader = TemplateLoader::with_options(CompileOptions::new().base_dir(dir.path().join("views")));
    assert_eq!(
        loader.render_file("home.hamljl", Bindings::new()).unwrap(),
        "<h1>Home</h1>"
    );
}

#[test]
fn test_string_source_includes_use_base_dir() {
    let dir = fixture(&[("row.hamljl", "%li= item")]);
    let options = CompileOptions::new().base_dir(dir.path());
    let template =
        CompiledTemplate::compile_with_options("%ul\n  - @include(\"row.hamljl\", item=1)", &options)
            .unwrap();

    let registry = Registry::with_builtins();
    let mut host = Interpreter::new(&registry, Bindings::new());
    assert_eq!(template.render(&mut host).unwrap(), "<ul>\n  <li>1</li>\n</ul>");
}
