//! Built-in starter project served when no project directory is given.

use crate::models::{FileTree, FileTreeNode};

const PACKAGE_JSON: &str = r#"{
  "name": "vite-starter",
  "private": true,
  "version": "0.0.0",
  "type": "module",
  "scripts": {
    "dev": "vite",
    "build": "vite build",
    "preview": "vite preview"
  },
  "dependencies": {
    "react": "^18.2.0",
    "react-dom": "^18.2.0"
  },
  "devDependencies": {
    "@vitejs/plugin-react": "^4.0.0",
    "vite": "^4.3.9"
  }
}
"#;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <title>Sandbox Demo</title>
  </head>
  <body>
    <div id="root"></div>
    <script type="module" src="/src/main.jsx"></script>
  </body>
</html>
"#;

const MAIN_JSX: &str = r#"import React from 'react'
import ReactDOM from 'react-dom/client'
import App from './App'

ReactDOM.createRoot(document.getElementById('root')).render(
  <React.StrictMode>
    <App />
  </React.StrictMode>
)
"#;

const APP_JSX: &str = r"import React from 'react'

function App() {
  return <h1>Hello from the sandbox!</h1>
}

export default App
";

/// A minimal Vite + React project.
#[must_use]
pub fn starter_project() -> FileTree {
    FileTree::new()
        .with("package.json", FileTreeNode::file(PACKAGE_JSON))
        .with("index.html", FileTreeNode::file(INDEX_HTML))
        .with(
            "src",
            FileTreeNode::directory([
                ("main.jsx", FileTreeNode::file(MAIN_JSX)),
                ("App.jsx", FileTreeNode::file(APP_JSX)),
            ]),
        )
}
